//! Data layouts: a recursive description of the physical bit layout of a
//! tuple stream, independent of row or column orientation.
//!
//! Leaves designate one schema entry by index; the special index equal to
//! the number of attributes designates the NULL bitmap.  Each inner node
//! publishes a stride and the number of tuples per stride block; a leaf
//! publishes its offset and per-tuple stride within the parent.

use crate::catalog::types::Type;

#[derive(Clone, Debug)]
pub struct Leaf {
    /// Index into the layout schema; `num_attrs` designates the NULL bitmap.
    pub index: usize,
    pub offset_in_bits: u64,
    pub stride_in_bits: u64,
}

#[derive(Clone, Debug)]
pub struct INode {
    pub stride_in_bits: u64,
    pub num_tuples: u64,
    pub children: Vec<LayoutNode>,
}

#[derive(Clone, Debug)]
pub enum LayoutNode {
    INode(INode),
    Leaf(Leaf),
}

/// A layout tree plus the per-leaf region assignment: all leaves of a row
/// layout live in one region, each leaf of a column layout in its own.
#[derive(Clone, Debug)]
pub struct DataLayout {
    root: INode,
    num_attrs: usize,
    /// Region id per leaf index.
    regions: Vec<usize>,
}

impl DataLayout {
    pub fn root(&self) -> &INode {
        &self.root
    }

    pub fn num_attrs(&self) -> usize {
        self.num_attrs
    }

    /// The leaf index of the NULL bitmap.
    pub fn null_bitmap_index(&self) -> usize {
        self.num_attrs
    }

    /// The region a leaf's bits live in.
    pub fn region_of(&self, leaf: usize) -> usize {
        self.regions[leaf]
    }

    pub fn num_regions(&self) -> usize {
        self.regions.iter().copied().max().map_or(1, |m| m + 1)
    }

    /// The absolute bit offset of `leaf` for tuple `row` within its region.
    pub fn offset_in_bits(&self, leaf: usize, row: u64) -> u64 {
        fn inode(node: &INode, leaf: usize, row: u64, acc: u64) -> Option<u64> {
            let block = row / node.num_tuples;
            let rem = row % node.num_tuples;
            let acc = acc + block * node.stride_in_bits;
            node.children.iter().find_map(|c| match c {
                LayoutNode::INode(child) => inode(child, leaf, rem, acc),
                LayoutNode::Leaf(l) if l.index == leaf => {
                    Some(acc + l.offset_in_bits + rem * l.stride_in_bits)
                }
                LayoutNode::Leaf(_) => None,
            })
        }
        inode(&self.root, leaf, row, 0).expect("leaf not present in layout")
    }

    /// The bit offset of the NULL bit of `attr` for tuple `row`.
    pub fn null_bit_offset(&self, attr: usize, row: u64) -> u64 {
        self.offset_in_bits(self.null_bitmap_index(), row) + attr as u64
    }

    pub fn leaf(&self, index: usize) -> &Leaf {
        fn rec<'a>(node: &'a LayoutNode, index: usize) -> Option<&'a Leaf> {
            match node {
                LayoutNode::Leaf(l) if l.index == index => Some(l),
                LayoutNode::Leaf(_) => None,
                LayoutNode::INode(inode) => inode.children.iter().find_map(|c| rec(c, index)),
            }
        }
        self.root
            .children
            .iter()
            .find_map(|c| rec(c, index))
            .expect("leaf not present in layout")
    }

    /// A row-major layout: per row every attribute at a byte-aligned offset,
    /// followed by the NULL bitmap (one bit per attribute), the whole row
    /// padded to a byte.  All leaves share region 0.
    pub fn row_major(attr_types: &[Type]) -> DataLayout {
        let num_attrs = attr_types.len();
        let mut children = Vec::with_capacity(num_attrs + 1);
        let mut offset = 0u64;
        for (i, ty) in attr_types.iter().enumerate() {
            let bits = ty.size_in_bits().max(1);
            let bytes = bits.div_ceil(8);
            children.push(LayoutNode::Leaf(Leaf {
                index: i,
                offset_in_bits: offset,
                stride_in_bits: 8 * bytes,
            }));
            offset += 8 * bytes;
        }
        children.push(LayoutNode::Leaf(Leaf {
            index: num_attrs,
            offset_in_bits: offset,
            stride_in_bits: 1,
        }));
        offset += num_attrs as u64;
        let row_stride = offset.div_ceil(8) * 8;
        DataLayout {
            root: INode {
                stride_in_bits: row_stride,
                num_tuples: 1,
                children,
            },
            num_attrs,
            regions: vec![0; num_attrs + 1],
        }
    }

    /// A column-major layout: one region per attribute with the type's size
    /// as stride (booleans bit-packed), plus a bitmap region of one bit per
    /// attribute and tuple.
    pub fn column_major(attr_types: &[Type]) -> DataLayout {
        let num_attrs = attr_types.len();
        let mut children = Vec::with_capacity(num_attrs + 1);
        for (i, ty) in attr_types.iter().enumerate() {
            let bits = ty.size_in_bits().max(1);
            let stride = if bits == 1 { 1 } else { bits.div_ceil(8) * 8 };
            children.push(LayoutNode::Leaf(Leaf {
                index: i,
                offset_in_bits: 0,
                stride_in_bits: stride,
            }));
        }
        children.push(LayoutNode::Leaf(Leaf {
            index: num_attrs,
            offset_in_bits: 0,
            stride_in_bits: num_attrs as u64,
        }));
        DataLayout {
            root: INode {
                stride_in_bits: 0,
                num_tuples: u64::MAX,
                children,
            },
            num_attrs,
            regions: (0..=num_attrs).collect(),
        }
    }
}

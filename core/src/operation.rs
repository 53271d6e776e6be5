//! The batched operation buffer sent by the native engine.
//!
//! A buffer is a flat sequence of typed entries. Each entry is a one-byte type tag followed by a
//! little-endian value. An operation is an `i32` op code followed by its payload entries.

use crate::error::DecodeError;
use crate::layout::{Edges, LayoutBox};
use crate::rect::Rect;
use crate::sign::Sign;

/// Operation codes.
pub mod op {
    pub const INSERT: i32 = 0;
    pub const REMOVE: i32 = 1;
    pub const DESTROY: i32 = 2;
    pub const READY_BATCHING: i32 = 3;
    pub const REMOVE_BATCHING: i32 = 4;
    pub const UPDATE_LAYOUT_PATCHING: i32 = 5;
    pub const TASM_FINISH: i32 = 6;
    pub const LAYOUT_FINISH: i32 = 7;
}

/// Positions inside one node's slice of a layout batch's int column.
mod stride {
    pub const LEFT: usize = 0;
    pub const TOP: usize = 1;
    pub const WIDTH: usize = 2;
    pub const HEIGHT: usize = 3;
    pub const PADDING: usize = 4;
    pub const MARGIN: usize = 8;
    pub const BORDER: usize = 12;
    pub const HAS_BOUND: usize = 16;
    pub const HAS_STICKY: usize = 17;
    pub const MAX_HEIGHT: usize = 18;
    pub const LEN: usize = 19;
}

const TAG_INT: u8 = 0;
const TAG_LONG: u8 = 1;
const TAG_DOUBLE: u8 = 2;

/// One typed value of the buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Entry {
    Int(i32),
    Long(i64),
    Double(f64),
}

impl Entry {
    fn type_name(&self) -> &'static str {
        match self {
            Entry::Int(_) => "int",
            Entry::Long(_) => "long",
            Entry::Double(_) => "double",
        }
    }
}

/// A layout result for one node, decoded from a layout batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutPatch {
    pub sign: Sign,
    pub layout: LayoutBox,
    pub node_index: i32,
}

/// A decoded operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert { parent: Sign, child: Sign, index: i32 },
    Remove { parent: Sign, child: Sign },
    Destroy { parent: Sign, child: Sign },
    ReadyBatch(Vec<Sign>),
    RemoveBatch(Vec<Sign>),
    UpdateLayoutBatch(Vec<LayoutPatch>),
    TasmFinish { operation_id: i64 },
    LayoutFinish { component_id: i32, operation_id: i64 },
}

/// Reads entries from a buffer.
pub struct OperationReader<'a> {
    buf: &'a [u8],
    pos: usize,
    index: usize,
    failed: bool,
}

impl<'a> OperationReader<'a> {
    pub fn new(buf: &'a [u8]) -> OperationReader<'a> {
        OperationReader {
            buf,
            pos: 0,
            index: 0,
            failed: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn bytes<'b>(&mut self, out: &'b mut [u8]) -> Result<&'b [u8], DecodeError> {
        let end = self.pos + out.len();
        if end > self.buf.len() {
            return Err(DecodeError::Truncated(self.index));
        }
        out.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    pub fn next_entry(&mut self) -> Result<Entry, DecodeError> {
        if self.is_empty() {
            return Err(DecodeError::Truncated(self.index));
        }
        let tag = self.buf[self.pos];
        self.pos += 1;
        let entry = match tag {
            TAG_INT => {
                let mut b = [0; 4];
                self.bytes(&mut b)?;
                Entry::Int(i32::from_le_bytes(b))
            }
            TAG_LONG => {
                let mut b = [0; 8];
                self.bytes(&mut b)?;
                Entry::Long(i64::from_le_bytes(b))
            }
            TAG_DOUBLE => {
                let mut b = [0; 8];
                self.bytes(&mut b)?;
                Entry::Double(f64::from_le_bytes(b))
            }
            tag => return Err(DecodeError::UnknownEntryTag(tag)),
        };
        self.index += 1;
        Ok(entry)
    }

    fn mismatch(&self, expected: &'static str, found: Entry) -> DecodeError {
        DecodeError::TypeMismatch {
            index: self.index - 1,
            expected,
            found: found.type_name(),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        match self.next_entry()? {
            Entry::Int(v) => Ok(v),
            other => Err(self.mismatch("int", other)),
        }
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        match self.next_entry()? {
            Entry::Long(v) => Ok(v),
            Entry::Int(v) => Ok(v as i64),
            other => Err(self.mismatch("long", other)),
        }
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        match self.next_entry()? {
            Entry::Double(v) => Ok(v as f32),
            Entry::Int(v) => Ok(v as f32),
            other => Err(self.mismatch("double", other)),
        }
    }

    fn read_count(&mut self) -> Result<usize, DecodeError> {
        let count = self.read_i32()?;
        if count < 0 {
            return Err(DecodeError::NegativeCount(count));
        }
        Ok(count as usize)
    }

    fn read_ints(&mut self) -> Result<Vec<i32>, DecodeError> {
        let count = self.read_count()?;
        (0..count).map(|_| self.read_i32()).collect()
    }

    fn read_floats(&mut self) -> Result<Vec<f32>, DecodeError> {
        let count = self.read_count()?;
        (0..count).map(|_| self.read_f32()).collect()
    }

    /// Decodes the next operation.
    pub fn read_operation(&mut self) -> Result<Operation, DecodeError> {
        let code = self.read_i32()?;
        let operation = match code {
            op::INSERT => Operation::Insert {
                parent: self.read_i32()?,
                child: self.read_i32()?,
                index: self.read_i32()?,
            },
            op::REMOVE => Operation::Remove {
                parent: self.read_i32()?,
                child: self.read_i32()?,
            },
            op::DESTROY => Operation::Destroy {
                parent: self.read_i32()?,
                child: self.read_i32()?,
            },
            op::READY_BATCHING => Operation::ReadyBatch(self.read_ints()?),
            op::REMOVE_BATCHING => Operation::RemoveBatch(self.read_ints()?),
            op::UPDATE_LAYOUT_PATCHING => Operation::UpdateLayoutBatch(self.read_layout_batch()?),
            op::TASM_FINISH => Operation::TasmFinish {
                operation_id: self.read_i64()?,
            },
            op::LAYOUT_FINISH => Operation::LayoutFinish {
                component_id: self.read_i32()?,
                operation_id: self.read_i64()?,
            },
            code => return Err(DecodeError::UnknownOperation(code)),
        };
        Ok(operation)
    }

    fn read_layout_batch(&mut self) -> Result<Vec<LayoutPatch>, DecodeError> {
        let ids = self.read_ints()?;
        let ints = self.read_ints()?;
        let bounds = self.read_floats()?;
        let stickies = self.read_floats()?;
        let node_indices = self.read_ints()?;
        if ints.len() != ids.len() * stride::LEN {
            return Err(DecodeError::LayoutStride {
                ids: ids.len(),
                ints: ints.len(),
            });
        }

        let mut bounds = bounds.chunks(4);
        let mut stickies = stickies.chunks(4);
        let mut patches = Vec::with_capacity(ids.len());
        for (i, sign) in ids.iter().enumerate() {
            let v = &ints[i * stride::LEN..(i + 1) * stride::LEN];
            let edges = |at: usize| {
                Edges::new(v[at] as f32, v[at + 1] as f32, v[at + 2] as f32, v[at + 3] as f32)
            };
            let mut layout = LayoutBox::with_frame(
                v[stride::LEFT] as f32,
                v[stride::TOP] as f32,
                v[stride::WIDTH] as f32,
                v[stride::HEIGHT] as f32,
            );
            layout.padding = edges(stride::PADDING);
            layout.margin = edges(stride::MARGIN);
            layout.border = edges(stride::BORDER);
            if v[stride::HAS_BOUND] != 0 {
                match bounds.next() {
                    Some(&[l, t, r, b]) => layout.bound = Some(Rect::from_ltrb(l, t, r, b)),
                    _ => return Err(DecodeError::Truncated(self.index)),
                }
            }
            if v[stride::HAS_STICKY] != 0 {
                match stickies.next() {
                    Some(&[l, t, r, b]) => layout.sticky = Some([l, t, r, b]),
                    _ => return Err(DecodeError::Truncated(self.index)),
                }
            }
            if v[stride::MAX_HEIGHT] >= 0 {
                layout.max_height = Some(v[stride::MAX_HEIGHT] as f32);
            }
            patches.push(LayoutPatch {
                sign: *sign,
                layout,
                node_index: node_indices.get(i).copied().unwrap_or(0),
            });
        }
        Ok(patches)
    }
}

impl<'a> Iterator for OperationReader<'a> {
    type Item = Result<Operation, DecodeError>;

    /// Yields operations until the buffer ends; stops after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.is_empty() {
            return None;
        }
        let result = self.read_operation();
        self.failed = result.is_err();
        Some(result)
    }
}

/// Writes operation buffers, for fake engines and tests.
#[derive(Debug, Clone, Default)]
pub struct OperationBatchBuilder {
    buf: Vec<u8>,
}

impl OperationBatchBuilder {
    pub fn new() -> OperationBatchBuilder {
        OperationBatchBuilder::default()
    }

    pub fn int(&mut self, value: i32) -> &mut Self {
        self.buf.push(TAG_INT);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn long(&mut self, value: i64) -> &mut Self {
        self.buf.push(TAG_LONG);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn double(&mut self, value: f64) -> &mut Self {
        self.buf.push(TAG_DOUBLE);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn ints(&mut self, values: &[i32]) -> &mut Self {
        self.int(values.len() as i32);
        for v in values {
            self.int(*v);
        }
        self
    }

    fn doubles(&mut self, values: &[f32]) -> &mut Self {
        self.int(values.len() as i32);
        for v in values {
            self.double(*v as f64);
        }
        self
    }

    pub fn insert(&mut self, parent: Sign, child: Sign, index: i32) -> &mut Self {
        self.int(op::INSERT).int(parent).int(child).int(index)
    }

    pub fn remove(&mut self, parent: Sign, child: Sign) -> &mut Self {
        self.int(op::REMOVE).int(parent).int(child)
    }

    pub fn destroy(&mut self, parent: Sign, child: Sign) -> &mut Self {
        self.int(op::DESTROY).int(parent).int(child)
    }

    pub fn ready_batch(&mut self, signs: &[Sign]) -> &mut Self {
        self.int(op::READY_BATCHING).ints(signs)
    }

    pub fn remove_batch(&mut self, signs: &[Sign]) -> &mut Self {
        self.int(op::REMOVE_BATCHING).ints(signs)
    }

    /// Column-encodes layout results.
    pub fn update_layout_batch(&mut self, patches: &[LayoutPatch]) -> &mut Self {
        let mut ids = Vec::with_capacity(patches.len());
        let mut ints = Vec::with_capacity(patches.len() * stride::LEN);
        let mut bounds = Vec::new();
        let mut stickies = Vec::new();
        let mut node_indices = Vec::with_capacity(patches.len());
        for patch in patches {
            let l = &patch.layout;
            ids.push(patch.sign);
            node_indices.push(patch.node_index);
            ints.extend_from_slice(&[l.left as i32, l.top as i32, l.width as i32, l.height as i32]);
            for e in &[l.padding, l.margin, l.border] {
                ints.extend_from_slice(&[e.left as i32, e.top as i32, e.right as i32, e.bottom as i32]);
            }
            ints.push(l.bound.is_some() as i32);
            ints.push(l.sticky.is_some() as i32);
            ints.push(l.max_height.map_or(-1, |h| h as i32));
            if let Some(b) = l.bound {
                bounds.extend_from_slice(&[b.left(), b.top(), b.right(), b.bottom()]);
            }
            if let Some(s) = l.sticky {
                stickies.extend_from_slice(&s);
            }
        }
        self.int(op::UPDATE_LAYOUT_PATCHING)
            .ints(&ids)
            .ints(&ints)
            .doubles(&bounds)
            .doubles(&stickies)
            .ints(&node_indices)
    }

    pub fn tasm_finish(&mut self, operation_id: i64) -> &mut Self {
        self.int(op::TASM_FINISH).long(operation_id)
    }

    pub fn layout_finish(&mut self, component_id: i32, operation_id: i64) -> &mut Self {
        self.int(op::LAYOUT_FINISH).int(component_id).long(operation_id)
    }

    pub fn build(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

#[test]
fn test_layout_batch_columns() {
    let mut with_extras = LayoutBox::with_frame(1., 2., 30., 40.);
    with_extras.padding = Edges::all(2.);
    with_extras.border = Edges::new(1., 0., 1., 0.);
    with_extras.bound = Some(Rect::from_ltrb(-5., -5., 35., 45.));
    with_extras.max_height = Some(100.);
    let mut sticky = LayoutBox::with_frame(0., 50., 10., 10.);
    sticky.sticky = Some([0., 4., 0., 0.]);

    let patches = vec![
        LayoutPatch {
            sign: 3,
            layout: with_extras,
            node_index: 7,
        },
        LayoutPatch {
            sign: 4,
            layout: sticky,
            node_index: 8,
        },
    ];
    let buf = OperationBatchBuilder::new()
        .update_layout_batch(&patches)
        .tasm_finish(1 << 33)
        .build();

    let ops: Vec<_> = OperationReader::new(&buf).collect();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0], Ok(Operation::UpdateLayoutBatch(patches)));
    assert_eq!(
        ops[1],
        Ok(Operation::TasmFinish {
            operation_id: 1 << 33
        })
    );
}

#[test]
fn test_unknown_operation_stops_reading() {
    let buf = OperationBatchBuilder::new()
        .insert(1, 2, -1)
        .int(42)
        .int(1)
        .remove(1, 2)
        .build();
    let ops: Vec<_> = OperationReader::new(&buf).collect();
    assert_eq!(
        ops,
        vec![
            Ok(Operation::Insert {
                parent: 1,
                child: 2,
                index: -1
            }),
            Err(DecodeError::UnknownOperation(42)),
        ]
    );
}

#[test]
fn test_truncated_and_mistyped_buffers() {
    let mut buf = OperationBatchBuilder::new().insert(1, 2, 0).build();
    buf.truncate(buf.len() - 2);
    assert_eq!(
        OperationReader::new(&buf).read_operation(),
        Err(DecodeError::Truncated(3))
    );

    let buf = OperationBatchBuilder::new()
        .int(op::REMOVE)
        .double(1.)
        .int(2)
        .build();
    assert_eq!(
        OperationReader::new(&buf).read_operation(),
        Err(DecodeError::TypeMismatch {
            index: 1,
            expected: "int",
            found: "double"
        })
    );

    let buf = OperationBatchBuilder::new()
        .int(op::UPDATE_LAYOUT_PATCHING)
        .ints(&[1])
        .ints(&[0; 5])
        .build();
    assert_eq!(
        OperationReader::new(&buf).read_operation(),
        Err(DecodeError::Truncated(9))
    );
}

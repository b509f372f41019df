//! Read-only access to the attributed block graph a scene is built from.
//!
//! The scene core never parses files. It consumes a model through the
//! narrow [`BlockModel`] trait: block lookup by link, type predicates and
//! typed field reads. Every typed read on a [`Record`] tolerates missing or
//! mistyped fields and returns a documented default instead.

mod memory;

pub use memory::MemoryModel;

use std::collections::HashMap;
use std::ops::Deref;

use cgmath::{Matrix3, Matrix4, Quaternion, SquareMatrix, Vector3, Zero};
use serde::{Deserialize, Serialize};

/// Link index of a block within the model.
pub type BlockId = u32;

/// A tagged field value.
///
/// Vectors and matrices are stored as plain arrays. Matrices are row-major
/// and quaternions are stored as `[w, x, y, z]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f32),
    Str(String),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Quat([f32; 4]),
    Matrix3([[f32; 3]; 3]),
    Matrix4([[f32; 4]; 4]),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Link(Option<BlockId>),
    Links(Vec<Option<BlockId>>),
    Record(Record),
    Rows(Vec<Record>),
}

impl Value {
    pub fn link(id: BlockId) -> Value {
        Value::Link(Some(id))
    }

    pub fn links(ids: &[BlockId]) -> Value {
        Value::Links(ids.iter().copied().map(Some).collect())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v as f32)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vector3<f32>> for Value {
    fn from(v: Vector3<f32>) -> Self {
        Value::Vec3([v.x, v.y, v.z])
    }
}

impl From<Quaternion<f32>> for Value {
    fn from(q: Quaternion<f32>) -> Self {
        Value::Quat([q.s, q.v.x, q.v.y, q.v.z])
    }
}

impl From<Matrix3<f32>> for Value {
    fn from(m: Matrix3<f32>) -> Self {
        // cgmath indexes column first
        let mut rows = [[0.0; 3]; 3];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = m[c][r];
            }
        }
        Value::Matrix3(rows)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<Vec<Record>> for Value {
    fn from(rows: Vec<Record>) -> Self {
        Value::Rows(rows)
    }
}

/// A table of named fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Boolean field, `false` when missing. Integers read as `!= 0`.
    pub fn bool(&self, name: &str) -> bool {
        match self.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Int(i)) => *i != 0,
            _ => false,
        }
    }

    /// Integer field, `0` when missing.
    pub fn int(&self, name: &str) -> i64 {
        match self.get(name) {
            Some(Value::Int(i)) => *i,
            Some(Value::Bool(b)) => *b as i64,
            _ => 0,
        }
    }

    /// Float field, `0.0` when missing. Integers are widened.
    pub fn float(&self, name: &str) -> f32 {
        match self.get(name) {
            Some(Value::Float(f)) => *f,
            Some(Value::Int(i)) => *i as f32,
            _ => 0.0,
        }
    }

    /// String field, empty when missing.
    pub fn string(&self, name: &str) -> &str {
        match self.get(name) {
            Some(Value::Str(s)) => s.as_str(),
            _ => "",
        }
    }

    /// Vector field, zero when missing. A four-component vector is truncated.
    pub fn vec3(&self, name: &str) -> Vector3<f32> {
        match self.get(name) {
            Some(Value::Vec3(v)) => Vector3::new(v[0], v[1], v[2]),
            Some(Value::Vec4(v)) => Vector3::new(v[0], v[1], v[2]),
            _ => Vector3::zero(),
        }
    }

    /// Quaternion field, identity when missing.
    pub fn quat(&self, name: &str) -> Quaternion<f32> {
        match self.get(name) {
            Some(Value::Quat(q)) => Quaternion::new(q[0], q[1], q[2], q[3]),
            _ => Quaternion::new(1.0, 0.0, 0.0, 0.0),
        }
    }

    /// Rotation matrix field, identity when missing.
    pub fn matrix3(&self, name: &str) -> Matrix3<f32> {
        match self.get(name) {
            Some(Value::Matrix3(m)) => Matrix3::new(
                m[0][0], m[1][0], m[2][0],
                m[0][1], m[1][1], m[2][1],
                m[0][2], m[1][2], m[2][2],
            ),
            Some(Value::Quat(q)) => Matrix3::from(Quaternion::new(q[0], q[1], q[2], q[3])),
            _ => Matrix3::identity(),
        }
    }

    /// 4x4 matrix field, identity when missing.
    pub fn matrix4(&self, name: &str) -> Matrix4<f32> {
        match self.get(name) {
            Some(Value::Matrix4(m)) => Matrix4::new(
                m[0][0], m[1][0], m[2][0], m[3][0],
                m[0][1], m[1][1], m[2][1], m[3][1],
                m[0][2], m[1][2], m[2][2], m[3][2],
                m[0][3], m[1][3], m[2][3], m[3][3],
            ),
            _ => Matrix4::identity(),
        }
    }

    /// Integer array, empty when missing.
    pub fn ints(&self, name: &str) -> &[i64] {
        match self.get(name) {
            Some(Value::Ints(v)) => v.as_slice(),
            _ => &[],
        }
    }

    /// Float array, empty when missing.
    pub fn floats(&self, name: &str) -> &[f32] {
        match self.get(name) {
            Some(Value::Floats(v)) => v.as_slice(),
            _ => &[],
        }
    }

    /// Single link, `None` when null or missing.
    pub fn link(&self, name: &str) -> Option<BlockId> {
        match self.get(name) {
            Some(Value::Link(link)) => *link,
            Some(Value::Int(i)) if *i >= 0 => Some(*i as BlockId),
            _ => None,
        }
    }

    /// Non-null entries of a link array, empty when missing.
    pub fn links(&self, name: &str) -> Vec<BlockId> {
        match self.get(name) {
            Some(Value::Links(links)) => links.iter().flatten().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Nested compound field.
    pub fn record(&self, name: &str) -> Option<&Record> {
        match self.get(name) {
            Some(Value::Record(r)) => Some(r),
            _ => None,
        }
    }

    /// Rows of a compound array, empty when missing.
    pub fn rows(&self, name: &str) -> &[Record] {
        match self.get(name) {
            Some(Value::Rows(rows)) => rows.as_slice(),
            _ => &[],
        }
    }
}

/// A block: a typed record addressed by link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(skip)]
    pub id: BlockId,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub fields: Record,
}

impl Block {
    pub fn new(id: BlockId, type_name: &str, fields: Record) -> Self {
        Self {
            id,
            type_name: type_name.to_string(),
            fields,
        }
    }
}

impl Deref for Block {
    type Target = Record;

    fn deref(&self) -> &Record {
        &self.fields
    }
}

/// The read API the scene core needs from a block graph.
pub trait BlockModel {
    /// Resolves a link. `None` if the block does not exist (any longer).
    fn block(&self, id: BlockId) -> Option<&Block>;

    /// True if `type_name` is `ancestor` or derives from it.
    fn inherits(&self, type_name: &str, ancestor: &str) -> bool;

    /// Links of the top-level blocks.
    fn root_links(&self) -> Vec<BlockId>;

    fn user_version(&self) -> u32 {
        0
    }

    /// Resolves a link and requires the block to inherit `ancestor`.
    fn block_of_type(&self, link: Option<BlockId>, ancestor: &str) -> Option<&Block> {
        let block = self.block(link?)?;
        self.inherits(&block.type_name, ancestor).then_some(block)
    }

    /// Resolves every link in `record.field` that inherits `ancestor`, skipping the rest.
    fn link_blocks(&self, record: &Record, field: &str, ancestor: &str) -> Vec<&Block> {
        record
            .links(field)
            .into_iter()
            .filter_map(|l| self.block_of_type(Some(l), ancestor))
            .collect()
    }
}

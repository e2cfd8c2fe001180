//! Typed ports and the values that flow through them.

use std::fmt;
use std::sync::Arc;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::core::Matrix;

/// Stable identifier of an inlet or outlet, unique within a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Payload type carried by a port. Links only connect equal kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    /// Height-like scalar field (`Matrix`)
    Matrix,
    /// Scattered object positions
    Objects,
    /// Polyline of world positions
    Spline,
    /// Single number, used for field inlets
    Scalar,
}

/// A placed object produced by scatter-like generators.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    pub pos: Vec2,
    pub height: f32,
    pub rotation: f32,
    pub scale: f32,
}

/// Value computed for one outlet.
///
/// Bulk payloads sit behind `Arc` so copying a product between caches is a
/// reference count bump.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Matrix(Arc<Matrix>),
    Objects(Arc<Vec<Transition>>),
    Spline(Arc<Vec<Vec2>>),
    Scalar(f32),
}

impl Value {
    pub fn kind(&self) -> PortKind {
        match self {
            Value::Matrix(_) => PortKind::Matrix,
            Value::Objects(_) => PortKind::Objects,
            Value::Spline(_) => PortKind::Spline,
            Value::Scalar(_) => PortKind::Scalar,
        }
    }

    pub fn as_matrix(&self) -> Option<&Arc<Matrix>> {
        match self {
            Value::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_objects(&self) -> Option<&Arc<Vec<Transition>>> {
        match self {
            Value::Objects(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Value::Scalar(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<Matrix> for Value {
    fn from(m: Matrix) -> Self {
        Value::Matrix(Arc::new(m))
    }
}

/// Declaration of an inlet, as listed by a generator.
#[derive(Clone, Debug, PartialEq)]
pub struct InletSpec {
    pub name: String,
    pub kind: PortKind,
    /// Scalar parameter this inlet overrides when linked.
    pub field: Option<String>,
}

impl InletSpec {
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        Self { name: name.into(), kind, field: None }
    }

    /// A scalar inlet that drives the parameter of the same name.
    pub fn field(param: impl Into<String>) -> Self {
        let param = param.into();
        Self { name: param.clone(), kind: PortKind::Scalar, field: Some(param) }
    }
}

/// Declaration of an outlet, as listed by a generator.
#[derive(Clone, Debug, PartialEq)]
pub struct OutletSpec {
    pub name: String,
    pub kind: PortKind,
}

impl OutletSpec {
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// Consumer port living on a node.
#[derive(Clone, Debug, PartialEq)]
pub struct Inlet {
    pub id: PortId,
    pub name: String,
    pub kind: PortKind,
    pub field: Option<String>,
}

/// Producer port living on a node.
#[derive(Clone, Debug, PartialEq)]
pub struct Outlet {
    pub id: PortId,
    pub name: String,
    pub kind: PortKind,
}

//! Task blocks: storage and computation primitives
//!
//! Every block is a closed sum of [`StorageBlock`] and [`ComputeBlock`]. A
//! computation block describes its ports with [`AxisMap`]s: each input or
//! output cluster is a projection of the block's own [`Shape`] onto the
//! canonical tensor axes of the data it exchanges.
//!
//! | Data | Cluster axes |
//! |------|--------------|
//! | activation | `(y, x, f)` |
//! | weight | `(f, r, ky, kx)` |
//! | bias, scale | `(f)` |
//! | lookup table | `(r)` |

use crate::edge::EdgeCluster;
use crate::error::{GraphError, Result};
use crate::ids::{EdgeId, TaskId};
use crate::shape::{Axis, Shape, Window};
use std::fmt;
use stmap_chip::EngineClass;

/// Numeric precision of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    /// 32-bit integer (partial sums)
    Int32,
    /// 8-bit integer
    Int8,
    /// 2-bit ternary
    Ternary,
    /// 1-bit binary
    Binary,
}

impl Precision {
    /// Bits per element
    #[must_use]
    pub const fn bits(self) -> usize {
        match self {
            Self::Int32 => 32,
            Self::Int8 => 8,
            Self::Ternary => 2,
            Self::Binary => 1,
        }
    }

    /// Bytes needed for `elements` values, rounded up
    #[must_use]
    pub const fn bytes_for(self, elements: usize) -> usize {
        (elements * self.bits()).div_ceil(8)
    }
}

/// How a computation adds its bias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BiasType {
    /// No bias
    #[default]
    None,
    /// One constant for every output
    Constant(i32),
    /// One value per output channel, read from a bias port
    Vector,
}

/// Zero padding per side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Padding {
    /// Rows before the first input row
    pub top: usize,
    /// Rows after the last input row
    pub bottom: usize,
    /// Columns before the first input column
    pub left: usize,
    /// Columns after the last input column
    pub right: usize,
}

impl Padding {
    /// Same padding on every side
    pub const fn uniform(p: usize) -> Self {
        Self {
            top: p,
            bottom: p,
            left: p,
            right: p,
        }
    }

    /// `(before, after)` padding along `Y` or `X`
    #[must_use]
    pub const fn along(&self, axis: Axis) -> (usize, usize) {
        match axis {
            Axis::X | Axis::Ix => (self.left, self.right),
            _ => (self.top, self.bottom),
        }
    }

    /// Replace the padding along `Y` or `X`
    pub fn set_along(&mut self, axis: Axis, before: usize, after: usize) {
        match axis {
            Axis::X | Axis::Ix => {
                self.left = before;
                self.right = after;
            }
            _ => {
                self.top = before;
                self.bottom = after;
            }
        }
    }
}

/// Sliding-window parameters; the kernel extent itself lives in the
/// block's `ky`/`kx` axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelWindow {
    /// Stride along `(y, x)`
    pub stride: (usize, usize),
    /// Dilation along `(y, x)`
    pub dilation: (usize, usize),
    /// Border padding
    pub padding: Padding,
}

impl Default for KernelWindow {
    fn default() -> Self {
        Self {
            stride: (1, 1),
            dilation: (1, 1),
            padding: Padding::default(),
        }
    }
}

impl KernelWindow {
    /// Window with the given stride and uniform padding
    pub const fn new(stride: usize, padding: usize) -> Self {
        Self {
            stride: (stride, stride),
            dilation: (1, 1),
            padding: Padding::uniform(padding),
        }
    }

    /// Stride along an output axis (`Y` or `X`)
    #[must_use]
    pub const fn stride_along(&self, axis: Axis) -> usize {
        match axis {
            Axis::X | Axis::Ix => self.stride.1,
            _ => self.stride.0,
        }
    }

    /// Extent covered by a dilated kernel of size `k`
    #[must_use]
    pub const fn effective_kernel(&self, axis: Axis, k: usize) -> usize {
        let dilation = match axis {
            Axis::X | Axis::Ix => self.dilation.1,
            _ => self.dilation.0,
        };
        if k == 0 {
            0
        } else {
            (k - 1) * dilation + 1
        }
    }

    /// `floor((input + pad_total - k_eff) / stride) + 1`, `None` when the
    /// kernel does not fit
    #[must_use]
    pub fn output_extent(&self, axis: Axis, input: usize, k: usize) -> Option<usize> {
        let (before, after) = self.padding.along(axis);
        let padded = input + before + after;
        let k_eff = self.effective_kernel(axis, k);
        let stride = self.stride_along(axis);
        if k_eff == 0 || stride == 0 || padded < k_eff {
            return None;
        }
        Some((padded - k_eff) / stride + 1)
    }
}

/// Leaky integrate-and-fire neuron parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LifParams {
    /// Firing threshold
    pub threshold: i32,
    /// Leak subtracted every step
    pub leak: i32,
    /// Potential after a spike
    pub reset: i32,
}

/// Storage block kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Intermediate activation
    Si,
    /// Intermediate activation feeding a convolution
    Sic,
    /// Intermediate activation feeding a 2-D convolution
    Sic2d,
    /// Intermediate activation feeding a fully-connected layer
    Sifc,
    /// Convolution weights
    Sw,
    /// Bias vector
    Sb,
    /// Fully-connected weights
    Swfc,
    /// 2-D convolution weights
    Sw2d,
    /// Network input
    Input,
    /// Network output
    Output,
}

impl StorageKind {
    /// Number of input ports
    #[must_use]
    pub const fn input_ports(self) -> usize {
        match self {
            Self::Sw | Self::Sb | Self::Swfc | Self::Sw2d | Self::Input => 0,
            Self::Si | Self::Sic | Self::Sic2d | Self::Sifc | Self::Output => 1,
        }
    }

    /// Number of output ports
    #[must_use]
    pub const fn output_ports(self) -> usize {
        match self {
            Self::Output => 0,
            _ => 1,
        }
    }

    /// Whether the block holds static data loaded before execution
    #[must_use]
    pub const fn is_static(self) -> bool {
        matches!(self, Self::Sw | Self::Sb | Self::Swfc | Self::Sw2d)
    }
}

/// Computation primitive with its own attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeOp {
    /// Convolution
    Cc {
        /// Sliding window
        window: KernelWindow,
        /// Output right shift
        bit_shift: u8,
    },
    /// 2-D convolution
    Cc2d {
        /// Sliding window
        window: KernelWindow,
        /// Output right shift
        bit_shift: u8,
    },
    /// Vector-matrix multiply
    Cvm {
        /// Output right shift
        bit_shift: u8,
    },
    /// Element-wise accumulation of `r` addends
    Cadd {
        /// Output right shift
        bit_shift: u8,
    },
    /// Average pooling
    Cavg {
        /// Sliding window
        window: KernelWindow,
        /// Output right shift
        bit_shift: u8,
    },
    /// Element-wise product of two vectors
    Cvvh {
        /// Output right shift
        bit_shift: u8,
    },
    /// Per-channel scale `a * x + b`
    Cax {
        /// Output right shift
        bit_shift: u8,
    },
    /// Vector shift
    Cvs {
        /// Right shift
        bit_shift: u8,
    },
    /// Binary comparator pooling
    Ccmpb {
        /// Sliding window
        window: KernelWindow,
        /// Comparator constant
        constant: i32,
    },
    /// Signed comparator pooling
    Ccmps {
        /// Sliding window
        window: KernelWindow,
        /// Comparator constant
        constant: i32,
    },
    /// Table lookup; the table length is the block's `r` extent
    Clut,
    /// Leaky integrate-and-fire neuron
    Clif {
        /// Neuron parameters
        params: LifParams,
    },
}

impl ComputeOp {
    /// Convolution with default bit shift
    pub const fn conv(window: KernelWindow) -> Self {
        Self::Cc {
            window,
            bit_shift: 0,
        }
    }

    /// Short mnemonic
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cc { .. } => "CC",
            Self::Cc2d { .. } => "CC2D",
            Self::Cvm { .. } => "CVM",
            Self::Cadd { .. } => "CADD",
            Self::Cavg { .. } => "CAVG",
            Self::Cvvh { .. } => "CVVH",
            Self::Cax { .. } => "CAX",
            Self::Cvs { .. } => "CVS",
            Self::Ccmpb { .. } => "CCMPB",
            Self::Ccmps { .. } => "CCMPS",
            Self::Clut => "CLUT",
            Self::Clif { .. } => "CLIF",
        }
    }

    /// Engine the primitive runs on
    #[must_use]
    pub const fn engine(&self) -> EngineClass {
        match self {
            Self::Cc { .. }
            | Self::Cc2d { .. }
            | Self::Cvm { .. }
            | Self::Cadd { .. }
            | Self::Cavg { .. }
            | Self::Cvvh { .. }
            | Self::Cax { .. } => EngineClass::Axon,
            Self::Cvs { .. }
            | Self::Ccmpb { .. }
            | Self::Ccmps { .. }
            | Self::Clut
            | Self::Clif { .. } => EngineClass::Soma,
        }
    }

    /// Sliding window of kernel-windowed primitives
    #[must_use]
    pub const fn window(&self) -> Option<&KernelWindow> {
        match self {
            Self::Cc { window, .. }
            | Self::Cc2d { window, .. }
            | Self::Cavg { window, .. }
            | Self::Ccmpb { window, .. }
            | Self::Ccmps { window, .. } => Some(window),
            _ => None,
        }
    }

    /// Mutable sliding window
    pub fn window_mut(&mut self) -> Option<&mut KernelWindow> {
        match self {
            Self::Cc { window, .. }
            | Self::Cc2d { window, .. }
            | Self::Cavg { window, .. }
            | Self::Ccmpb { window, .. }
            | Self::Ccmps { window, .. } => Some(window),
            _ => None,
        }
    }

    /// Output bit shift, if the primitive has one
    #[must_use]
    pub const fn bit_shift(&self) -> Option<u8> {
        match self {
            Self::Cc { bit_shift, .. }
            | Self::Cc2d { bit_shift, .. }
            | Self::Cvm { bit_shift }
            | Self::Cadd { bit_shift }
            | Self::Cavg { bit_shift, .. }
            | Self::Cvvh { bit_shift }
            | Self::Cax { bit_shift }
            | Self::Cvs { bit_shift } => Some(*bit_shift),
            _ => None,
        }
    }

    /// Replace the bit shift; no-op for primitives without one
    pub fn set_bit_shift(&mut self, shift: u8) {
        match self {
            Self::Cc { bit_shift, .. }
            | Self::Cc2d { bit_shift, .. }
            | Self::Cvm { bit_shift }
            | Self::Cadd { bit_shift }
            | Self::Cavg { bit_shift, .. }
            | Self::Cvvh { bit_shift }
            | Self::Cax { bit_shift }
            | Self::Cvs { bit_shift } => *bit_shift = shift,
            _ => {}
        }
    }

    /// Whether splitting `r` turns the block into partial sums
    #[must_use]
    pub const fn is_reduction(&self) -> bool {
        matches!(self, Self::Cc { .. } | Self::Cc2d { .. } | Self::Cvm { .. })
    }

    /// Whether the primitive reads a vector bias port
    #[must_use]
    pub const fn supports_vector_bias(&self) -> bool {
        matches!(
            self,
            Self::Cc { .. } | Self::Cc2d { .. } | Self::Cvm { .. } | Self::Cax { .. } | Self::Cadd { .. }
        )
    }
}

impl fmt::Display for ComputeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Projection of a block's axes onto one of its clusters: a list of
/// `(cluster axis, block axis)` pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisMap(&'static [(Axis, Axis)]);

impl AxisMap {
    /// Kernel-windowed activation with reduction channels
    pub const CONV_INPUT: Self = Self(&[(Axis::Y, Axis::Iy), (Axis::X, Axis::Ix), (Axis::F, Axis::R)]);
    /// Kernel-windowed activation, channel-wise
    pub const POOL_INPUT: Self = Self(&[(Axis::Y, Axis::Iy), (Axis::X, Axis::Ix), (Axis::F, Axis::F)]);
    /// Activation consumed by a vector-matrix multiply
    pub const VECTOR_INPUT: Self = Self(&[(Axis::F, Axis::R)]);
    /// Element-wise activation, also every output
    pub const ELEMENTWISE: Self = Self(&[(Axis::Y, Axis::Y), (Axis::X, Axis::X), (Axis::F, Axis::F)]);
    /// Convolution weights
    pub const CONV_WEIGHT: Self = Self(&[
        (Axis::F, Axis::F),
        (Axis::R, Axis::R),
        (Axis::Ky, Axis::Ky),
        (Axis::Kx, Axis::Kx),
    ]);
    /// Vector-matrix weights
    pub const MATRIX_WEIGHT: Self = Self(&[(Axis::F, Axis::F), (Axis::R, Axis::R)]);
    /// Per-channel vector (bias, scale)
    pub const CHANNEL: Self = Self(&[(Axis::F, Axis::F)]);
    /// Lookup table
    pub const TABLE: Self = Self(&[(Axis::R, Axis::R)]);

    /// Cluster shape for a block shape
    #[must_use]
    pub fn shape(&self, block: &Shape) -> Shape {
        let mut out = Shape::ZERO;
        for &(cluster, own) in self.0 {
            out.set(cluster, block.get(own));
        }
        out
    }

    /// Cluster window for a window expressed in block axes
    #[must_use]
    pub fn window(&self, block: &Window) -> Window {
        Window::new(self.shape(&block.position), self.shape(&block.size))
    }
}

/// What an input port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandRole {
    /// Activation produced at run time
    Activation,
    /// Weights
    Weight,
    /// Bias vector
    Bias,
    /// Lookup table
    Table,
}

/// Computation block: primitive, extents and numeric format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeBlock {
    /// Primitive and its attributes
    pub op: ComputeOp,
    /// Block extents
    pub shape: Shape,
    /// Output precision
    pub precision: Precision,
    /// Bias handling
    pub bias: BiasType,
}

impl ComputeBlock {
    /// Create a computation block description
    pub const fn new(op: ComputeOp, shape: Shape, precision: Precision, bias: BiasType) -> Self {
        Self {
            op,
            shape,
            precision,
            bias,
        }
    }

    /// Input ports in order; a vector bias port is always last
    #[must_use]
    pub fn input_ports(&self) -> Vec<(OperandRole, AxisMap)> {
        use OperandRole::{Activation, Bias, Table, Weight};
        let mut ports = match self.op {
            ComputeOp::Cc { .. } | ComputeOp::Cc2d { .. } => {
                vec![(Activation, AxisMap::CONV_INPUT), (Weight, AxisMap::CONV_WEIGHT)]
            }
            ComputeOp::Cvm { .. } => {
                vec![(Activation, AxisMap::VECTOR_INPUT), (Weight, AxisMap::MATRIX_WEIGHT)]
            }
            ComputeOp::Cadd { .. } => vec![(Activation, AxisMap::ELEMENTWISE); self.shape.r.max(1)],
            ComputeOp::Cavg { .. } | ComputeOp::Ccmpb { .. } | ComputeOp::Ccmps { .. } => {
                vec![(Activation, AxisMap::POOL_INPUT)]
            }
            ComputeOp::Cvvh { .. } => vec![(Activation, AxisMap::ELEMENTWISE); 2],
            ComputeOp::Cax { .. } => {
                vec![(Activation, AxisMap::ELEMENTWISE), (Weight, AxisMap::CHANNEL)]
            }
            ComputeOp::Clut => vec![(Activation, AxisMap::ELEMENTWISE), (Table, AxisMap::TABLE)],
            ComputeOp::Cvs { .. } | ComputeOp::Clif { .. } => {
                vec![(Activation, AxisMap::ELEMENTWISE)]
            }
        };
        if self.bias == BiasType::Vector && self.op.supports_vector_bias() {
            ports.push((Bias, AxisMap::CHANNEL));
        }
        ports
    }

    /// Map from block axes to the output cluster
    #[must_use]
    pub const fn output_map(&self) -> AxisMap {
        AxisMap::ELEMENTWISE
    }

    /// Check the shape carries every axis the primitive needs and that
    /// kernel windows are consistent with the recorded input extent
    fn validate(&self, id: TaskId) -> Result<()> {
        let required: &[Axis] = match self.op {
            ComputeOp::Cc { .. } | ComputeOp::Cc2d { .. } => &[
                Axis::Y,
                Axis::X,
                Axis::F,
                Axis::R,
                Axis::Ky,
                Axis::Kx,
                Axis::Iy,
                Axis::Ix,
            ],
            ComputeOp::Cavg { .. } | ComputeOp::Ccmpb { .. } | ComputeOp::Ccmps { .. } => {
                &[Axis::Y, Axis::X, Axis::F, Axis::Ky, Axis::Kx, Axis::Iy, Axis::Ix]
            }
            ComputeOp::Cvm { .. } | ComputeOp::Cadd { .. } | ComputeOp::Clut => &[Axis::F, Axis::R],
            ComputeOp::Cvvh { .. } | ComputeOp::Cax { .. } | ComputeOp::Cvs { .. } | ComputeOp::Clif { .. } => {
                &[Axis::F]
            }
        };
        for &axis in required {
            if !self.shape.has(axis) {
                return Err(GraphError::shape(
                    id,
                    format!("{} requires axis {axis}, shape is {}", self.op, self.shape),
                ));
            }
        }

        if let Some(window) = self.op.window() {
            for (out_axis, in_axis, k) in [
                (Axis::Y, Axis::Iy, self.shape.ky),
                (Axis::X, Axis::Ix, self.shape.kx),
            ] {
                let expected = window.output_extent(in_axis, self.shape.get(in_axis), k);
                if expected != Some(self.shape.get(out_axis)) {
                    return Err(GraphError::shape(
                        id,
                        format!(
                            "{} output {out_axis}={} does not match input {in_axis}={} (expected {expected:?})",
                            self.op,
                            self.shape.get(out_axis),
                            self.shape.get(in_axis)
                        ),
                    ));
                }
            }
        }

        if self.bias == BiasType::Vector && !self.op.supports_vector_bias() {
            return Err(GraphError::unsupported(
                id,
                format!("{} has no vector bias port", self.op),
            ));
        }
        Ok(())
    }
}

/// Storage block: a tensor held or staged in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageBlock {
    /// What the tensor is
    pub kind: StorageKind,
    /// Tensor extents in canonical axes
    pub shape: Shape,
    /// Element precision
    pub precision: Precision,
}

/// Block payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Tensor holder
    Storage(StorageBlock),
    /// Hardware primitive
    Compute(ComputeBlock),
}

/// One node of the task graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBlock {
    id: TaskId,
    kind: BlockKind,
    inputs: Vec<EdgeCluster>,
    outputs: Vec<EdgeCluster>,
}

impl TaskBlock {
    /// Create a storage block with unconnected ports
    ///
    /// # Errors
    ///
    /// Returns `ShapeViolation` if the shape has no positive axis.
    pub fn storage(id: TaskId, kind: StorageKind, shape: Shape, precision: Precision) -> Result<Self> {
        if shape.volume() == 0 {
            return Err(GraphError::shape(id, format!("{kind:?} storage has an empty shape")));
        }
        Ok(Self {
            id,
            kind: BlockKind::Storage(StorageBlock {
                kind,
                shape,
                precision,
            }),
            inputs: vec![EdgeCluster::new(shape); kind.input_ports()],
            outputs: vec![EdgeCluster::new(shape); kind.output_ports()],
        })
    }

    /// Create a computation block with unconnected ports
    ///
    /// # Errors
    ///
    /// Returns `ShapeViolation` if the shape lacks an axis the primitive
    /// needs or the kernel window does not produce the output extent, and
    /// `UnsupportedBlock` for a vector bias on a primitive without a bias
    /// port.
    pub fn compute(id: TaskId, block: ComputeBlock) -> Result<Self> {
        block.validate(id)?;
        let inputs = block
            .input_ports()
            .iter()
            .map(|(_, map)| EdgeCluster::new(map.shape(&block.shape)))
            .collect();
        let outputs = vec![EdgeCluster::new(block.output_map().shape(&block.shape))];
        Ok(Self {
            id,
            kind: BlockKind::Compute(block),
            inputs,
            outputs,
        })
    }

    /// Same kind and attributes with a new id and shape, ports unconnected
    ///
    /// # Errors
    ///
    /// Fails like the constructors when the new shape is not valid for the
    /// block kind.
    pub fn copy_like(&self, id: TaskId, shape: Shape) -> Result<Self> {
        match &self.kind {
            BlockKind::Storage(s) => Self::storage(id, s.kind, shape, s.precision),
            BlockKind::Compute(c) => Self::compute(
                id,
                ComputeBlock {
                    shape,
                    ..c.clone()
                },
            ),
        }
    }

    /// Block id
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Payload
    #[must_use]
    pub const fn kind(&self) -> &BlockKind {
        &self.kind
    }

    /// Block extents
    #[must_use]
    pub const fn shape(&self) -> &Shape {
        match &self.kind {
            BlockKind::Storage(s) => &s.shape,
            BlockKind::Compute(c) => &c.shape,
        }
    }

    /// Element precision
    #[must_use]
    pub const fn precision(&self) -> Precision {
        match &self.kind {
            BlockKind::Storage(s) => s.precision,
            BlockKind::Compute(c) => c.precision,
        }
    }

    /// Storage payload, if a storage block
    #[must_use]
    pub const fn as_storage(&self) -> Option<&StorageBlock> {
        match &self.kind {
            BlockKind::Storage(s) => Some(s),
            BlockKind::Compute(_) => None,
        }
    }

    /// Computation payload, if a computation block
    #[must_use]
    pub const fn as_compute(&self) -> Option<&ComputeBlock> {
        match &self.kind {
            BlockKind::Compute(c) => Some(c),
            BlockKind::Storage(_) => None,
        }
    }

    /// Whether this is a computation block
    #[must_use]
    pub const fn is_compute(&self) -> bool {
        matches!(self.kind, BlockKind::Compute(_))
    }

    /// Engine needed, `None` for storage
    #[must_use]
    pub const fn engine(&self) -> Option<EngineClass> {
        match &self.kind {
            BlockKind::Compute(c) => Some(c.op.engine()),
            BlockKind::Storage(_) => None,
        }
    }

    /// Input clusters in port order
    #[must_use]
    pub fn input_clusters(&self) -> &[EdgeCluster] {
        &self.inputs
    }

    /// Output clusters in port order
    #[must_use]
    pub fn output_clusters(&self) -> &[EdgeCluster] {
        &self.outputs
    }

    /// Input cluster `port`
    ///
    /// # Errors
    ///
    /// Returns `UnknownPort` if out of range.
    pub fn input(&self, port: usize) -> Result<&EdgeCluster> {
        self.inputs.get(port).ok_or(GraphError::UnknownPort {
            task: self.id,
            direction: "input",
            port,
        })
    }

    /// Output cluster `port`
    ///
    /// # Errors
    ///
    /// Returns `UnknownPort` if out of range.
    pub fn output(&self, port: usize) -> Result<&EdgeCluster> {
        self.outputs.get(port).ok_or(GraphError::UnknownPort {
            task: self.id,
            direction: "output",
            port,
        })
    }

    /// Every edge id on every port
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .flat_map(|c| c.edges().iter().copied())
    }

    pub(crate) fn attach_input(&mut self, port: usize, edge: EdgeId) -> Result<()> {
        let id = self.id;
        self.inputs
            .get_mut(port)
            .ok_or(GraphError::UnknownPort {
                task: id,
                direction: "input",
                port,
            })?
            .attach(edge);
        Ok(())
    }

    pub(crate) fn attach_output(&mut self, port: usize, edge: EdgeId) -> Result<()> {
        let id = self.id;
        self.outputs
            .get_mut(port)
            .ok_or(GraphError::UnknownPort {
                task: id,
                direction: "output",
                port,
            })?
            .attach(edge);
        Ok(())
    }

    pub(crate) fn detach(&mut self, edge: EdgeId) {
        for cluster in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            cluster.detach(edge);
        }
    }
}

impl fmt::Display for TaskBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BlockKind::Storage(s) => write!(f, "{} {:?}{}", self.id, s.kind, s.shape),
            BlockKind::Compute(c) => write!(f, "{} {}{}", self.id, c.op, c.shape),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv_shape() -> Shape {
        Shape {
            y: 4,
            x: 4,
            f: 8,
            r: 3,
            ky: 3,
            kx: 3,
            iy: 6,
            ix: 6,
        }
    }

    #[test]
    fn test_output_extent() {
        let w = KernelWindow::new(1, 0);
        assert_eq!(w.output_extent(Axis::Iy, 6, 3), Some(4));
        let padded = KernelWindow::new(2, 1);
        assert_eq!(padded.output_extent(Axis::Iy, 7, 3), Some(4));
        assert_eq!(w.output_extent(Axis::Iy, 2, 3), None);
    }

    #[test]
    fn test_conv_clusters() {
        let block = ComputeBlock::new(
            ComputeOp::conv(KernelWindow::default()),
            conv_shape(),
            Precision::Int8,
            BiasType::Vector,
        );
        let t = TaskBlock::compute(TaskId::new(1), block).unwrap();
        assert_eq!(t.input_clusters().len(), 3);
        assert_eq!(*t.input(0).unwrap().shape(), Shape::yxf(6, 6, 3));
        assert_eq!(t.input(1).unwrap().shape().volume(), 8 * 3 * 3 * 3);
        assert_eq!(*t.input(2).unwrap().shape(), Shape::vector(8));
        assert_eq!(*t.output(0).unwrap().shape(), Shape::yxf(4, 4, 8));
        assert_eq!(t.engine(), Some(EngineClass::Axon));
    }

    #[test]
    fn test_conv_rejects_inconsistent_window() {
        let mut shape = conv_shape();
        shape.iy = 7;
        let block = ComputeBlock::new(
            ComputeOp::conv(KernelWindow::default()),
            shape,
            Precision::Int8,
            BiasType::None,
        );
        let err = TaskBlock::compute(TaskId::new(1), block).unwrap_err();
        assert!(matches!(err, GraphError::ShapeViolation { .. }));
    }

    #[test]
    fn test_cadd_has_one_port_per_addend() {
        let block = ComputeBlock::new(
            ComputeOp::Cadd { bit_shift: 0 },
            Shape::vector(4).with(Axis::R, 3),
            Precision::Int8,
            BiasType::None,
        );
        let t = TaskBlock::compute(TaskId::new(2), block).unwrap();
        assert_eq!(t.input_clusters().len(), 3);
        assert!(t.input_clusters().iter().all(|c| *c.shape() == Shape::vector(4)));
    }

    #[test]
    fn test_storage_ports() {
        let w = TaskBlock::storage(TaskId::new(0), StorageKind::Sw, Shape::vector(3), Precision::Int8).unwrap();
        assert!(w.input_clusters().is_empty());
        assert_eq!(w.output_clusters().len(), 1);
        let out = TaskBlock::storage(TaskId::new(1), StorageKind::Output, Shape::vector(3), Precision::Int8)
            .unwrap();
        assert_eq!(out.input_clusters().len(), 1);
        assert!(out.output_clusters().is_empty());
    }

    #[test]
    fn test_precision_bytes() {
        assert_eq!(Precision::Int8.bytes_for(10), 10);
        assert_eq!(Precision::Binary.bytes_for(10), 2);
        assert_eq!(Precision::Ternary.bytes_for(3), 1);
        assert_eq!(Precision::Int32.bytes_for(3), 12);
    }

    #[test]
    fn test_soma_engine() {
        assert_eq!(ComputeOp::Clut.engine(), EngineClass::Soma);
        assert_eq!(ComputeOp::Cvm { bit_shift: 0 }.engine(), EngineClass::Axon);
    }
}

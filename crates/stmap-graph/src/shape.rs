//! Tensor extents and windows
//!
//! A [`Shape`] has six logical axes (`y`, `x`, `f`, `r`, `ky`, `kx`) and two
//! redundant axes (`iy`, `ix`) recording the un-padded input extent of
//! kernel-windowed computations. An extent of 0 means the axis does not apply
//! to the block; such axes are skipped by every element-wise comparison.

use std::fmt;
use std::ops::Add;

/// Shape axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    /// Output rows
    Y,
    /// Output columns
    X,
    /// Output channels / features
    F,
    /// Reduction (input channels)
    R,
    /// Kernel rows
    Ky,
    /// Kernel columns
    Kx,
    /// Un-padded input rows
    Iy,
    /// Un-padded input columns
    Ix,
}

impl Axis {
    /// Logical axes: the ones that count towards volume and windows
    pub const LOGICAL: [Self; 6] = [Self::Y, Self::X, Self::F, Self::R, Self::Ky, Self::Kx];

    /// Every axis
    pub const ALL: [Self; 8] = [
        Self::Y,
        Self::X,
        Self::F,
        Self::R,
        Self::Ky,
        Self::Kx,
        Self::Iy,
        Self::Ix,
    ];

    /// Axes the splitter may partition
    pub const SPLITTABLE: [Self; 4] = [Self::Y, Self::X, Self::F, Self::R];
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Y => "y",
            Self::X => "x",
            Self::F => "f",
            Self::R => "r",
            Self::Ky => "ky",
            Self::Kx => "kx",
            Self::Iy => "iy",
            Self::Ix => "ix",
        };
        write!(f, "{name}")
    }
}

/// Tensor extent per axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    /// Output rows
    pub y: usize,
    /// Output columns
    pub x: usize,
    /// Output channels
    pub f: usize,
    /// Reduction extent
    pub r: usize,
    /// Kernel rows
    pub ky: usize,
    /// Kernel columns
    pub kx: usize,
    /// Un-padded input rows
    pub iy: usize,
    /// Un-padded input columns
    pub ix: usize,
}

impl Shape {
    /// All axes absent
    pub const ZERO: Self = Self {
        y: 0,
        x: 0,
        f: 0,
        r: 0,
        ky: 0,
        kx: 0,
        iy: 0,
        ix: 0,
    };

    /// Activation-style `(y, x, f)` shape
    pub const fn yxf(y: usize, x: usize, f: usize) -> Self {
        Self { y, x, f, ..Self::ZERO }
    }

    /// Vector shape along `f`
    pub const fn vector(f: usize) -> Self {
        Self { f, ..Self::ZERO }
    }

    /// Builder: set one axis
    #[must_use]
    pub fn with(mut self, axis: Axis, value: usize) -> Self {
        self.set(axis, value);
        self
    }

    /// Extent along `axis`
    #[must_use]
    pub const fn get(&self, axis: Axis) -> usize {
        match axis {
            Axis::Y => self.y,
            Axis::X => self.x,
            Axis::F => self.f,
            Axis::R => self.r,
            Axis::Ky => self.ky,
            Axis::Kx => self.kx,
            Axis::Iy => self.iy,
            Axis::Ix => self.ix,
        }
    }

    /// Set the extent along `axis`
    pub fn set(&mut self, axis: Axis, value: usize) {
        let slot = match axis {
            Axis::Y => &mut self.y,
            Axis::X => &mut self.x,
            Axis::F => &mut self.f,
            Axis::R => &mut self.r,
            Axis::Ky => &mut self.ky,
            Axis::Kx => &mut self.kx,
            Axis::Iy => &mut self.iy,
            Axis::Ix => &mut self.ix,
        };
        *slot = value;
    }

    /// Whether `axis` applies to this shape
    #[must_use]
    pub const fn has(&self, axis: Axis) -> bool {
        self.get(axis) > 0
    }

    /// Product of the strictly-positive logical axes, 0 if none
    #[must_use]
    pub fn volume(&self) -> usize {
        let present: Vec<usize> = Axis::LOGICAL
            .iter()
            .map(|&a| self.get(a))
            .filter(|&v| v > 0)
            .collect();
        if present.is_empty() {
            0
        } else {
            present.iter().product()
        }
    }

    /// Element-wise equality over the logical axes present on both sides
    #[must_use]
    pub fn agrees_with(&self, other: &Self) -> bool {
        Self::comparable(self, other).all(|(a, b)| a == b)
    }

    /// Element-wise `<=` over the logical axes present on both sides
    #[must_use]
    pub fn fits_within(&self, other: &Self) -> bool {
        Self::comparable(self, other).all(|(a, b)| a <= b)
    }

    /// Per-axis saturating difference `self - origin`
    #[must_use]
    pub fn offset_from(&self, origin: &Self) -> Self {
        let mut out = Self::ZERO;
        for axis in Axis::ALL {
            out.set(axis, self.get(axis).saturating_sub(origin.get(axis)));
        }
        out
    }

    fn comparable<'a>(a: &'a Self, b: &'a Self) -> impl Iterator<Item = (usize, usize)> + 'a {
        Axis::LOGICAL
            .iter()
            .map(move |&axis| (a.get(axis), b.get(axis)))
            .filter(|&(x, y)| x > 0 && y > 0)
    }
}

impl Add for Shape {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let mut out = Self::ZERO;
        for axis in Axis::ALL {
            out.set(axis, self.get(axis) + rhs.get(axis));
        }
        out
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let mut first = true;
        for axis in Axis::ALL {
            let v = self.get(axis);
            if v == 0 {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{axis}={v}")?;
            first = false;
        }
        write!(f, "]")
    }
}

/// Rectangular region `(position, size)` of a cluster, in the cluster's axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Window {
    /// Start offset per axis
    pub position: Shape,
    /// Extent per axis
    pub size: Shape,
}

impl Window {
    /// Window at `position` of extent `size`
    pub const fn new(position: Shape, size: Shape) -> Self {
        Self { position, size }
    }

    /// Window covering the whole of `shape`
    pub const fn full(shape: Shape) -> Self {
        Self {
            position: Shape::ZERO,
            size: shape,
        }
    }

    /// Number of elements covered
    #[must_use]
    pub fn volume(&self) -> usize {
        self.size.volume()
    }

    /// Overlap of two windows.
    ///
    /// Axes absent on either side are absent in the result. Returns `None`
    /// when a shared axis does not overlap.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let mut out = Self::default();
        for axis in Axis::LOGICAL {
            let (sa, sb) = (self.size.get(axis), other.size.get(axis));
            if sa == 0 || sb == 0 {
                continue;
            }
            let start = self.position.get(axis).max(other.position.get(axis));
            let end = (self.position.get(axis) + sa).min(other.position.get(axis) + sb);
            if start >= end {
                return None;
            }
            out.position.set(axis, start);
            out.size.set(axis, end - start);
        }
        Some(out)
    }

    /// Whether the window lies inside a cluster of extent `shape` and uses
    /// exactly the axes the cluster has
    #[must_use]
    pub fn within(&self, shape: &Shape) -> bool {
        Axis::LOGICAL.iter().all(|&axis| {
            let (extent, pos, size) = (shape.get(axis), self.position.get(axis), self.size.get(axis));
            if extent == 0 {
                pos == 0 && size == 0
            } else {
                size > 0 && pos + size <= extent
            }
        })
    }

    /// Whether `inner` is entirely contained in `self`
    #[must_use]
    pub fn contains(&self, inner: &Self) -> bool {
        self.intersect(inner).is_some_and(|i| i == *inner)
    }

    /// Re-express `inner` relative to this window's origin
    #[must_use]
    pub fn localize(&self, inner: &Self) -> Self {
        Self::new(inner.position.offset_from(&self.position), inner.size)
    }

    /// Translate `inner` (a sub-window of `self`) onto `target`, a window of
    /// the same size in another coordinate system
    #[must_use]
    pub fn project(&self, inner: &Self, target: &Self) -> Self {
        Self::new(
            target.position + inner.position.offset_from(&self.position),
            inner.size,
        )
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.size, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_skips_absent_axes() {
        assert_eq!(Shape::yxf(2, 3, 4).volume(), 24);
        assert_eq!(Shape::vector(5).volume(), 5);
        assert_eq!(Shape::ZERO.volume(), 0);
        let conv = Shape::yxf(4, 4, 8).with(Axis::Iy, 6).with(Axis::Ix, 6);
        assert_eq!(conv.volume(), 128, "iy/ix are redundant and excluded");
    }

    #[test]
    fn test_absent_axes_are_exempt() {
        let a = Shape::yxf(4, 4, 0);
        let b = Shape::yxf(4, 4, 16);
        assert!(a.agrees_with(&b));
        assert!(a.fits_within(&Shape::yxf(5, 4, 1)));
        assert!(!b.fits_within(&Shape::yxf(3, 4, 16)));
    }

    #[test]
    fn test_intersect() {
        let a = Window::new(Shape::yxf(0, 0, 0), Shape::yxf(4, 4, 8));
        let b = Window::new(Shape::yxf(2, 1, 0), Shape::yxf(4, 2, 8));
        let i = a.intersect(&b).unwrap();
        assert_eq!(i.position, Shape::yxf(2, 1, 0));
        assert_eq!(i.size, Shape::yxf(2, 2, 8));

        let far = Window::new(Shape::yxf(4, 0, 0), Shape::yxf(1, 4, 8));
        assert!(a.intersect(&far).is_none());
    }

    #[test]
    fn test_within() {
        let cluster = Shape::yxf(4, 4, 8);
        assert!(Window::full(cluster).within(&cluster));
        assert!(!Window::new(Shape::yxf(3, 0, 0), Shape::yxf(2, 4, 8)).within(&cluster));
        assert!(!Window::full(Shape::yxf(4, 4, 0)).within(&cluster));
    }

    #[test]
    fn test_project() {
        let dst = Window::new(Shape::yxf(2, 0, 0), Shape::yxf(4, 4, 8));
        let src = Window::new(Shape::yxf(0, 0, 8), Shape::yxf(4, 4, 8));
        let part = Window::new(Shape::yxf(3, 0, 0), Shape::yxf(2, 4, 8));
        let mapped = dst.project(&part, &src);
        assert_eq!(mapped.position, Shape::yxf(1, 0, 8));
        assert_eq!(mapped.size, part.size);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::yxf(1, 2, 3)), "[y=1, x=2, f=3]");
    }
}

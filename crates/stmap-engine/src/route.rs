//! Dimension-ordered routes between columns.
//!
//! A route is the list of columns a transfer visits, source and
//! destination included. Consecutive columns differ by one unit step in
//! exactly one dimension of exactly one space level; every such pair is a
//! [`Hop`]. Levels are resolved outermost first and, within a level,
//! dimensions in index order, which keeps routes deterministic and
//! deadlock-free on a mesh.

use stmap_chip::{HardwareConfig, MLCoord};

/// One directed link between adjacent columns
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hop {
    /// Column the link leaves
    pub from: MLCoord,
    /// Column the link enters
    pub to: MLCoord,
}

impl Hop {
    /// Hierarchy level the link crosses
    #[must_use]
    pub fn level(&self) -> Option<usize> {
        self.from.first_difference(&self.to)
    }

    /// Link bandwidth in bytes per cycle
    #[must_use]
    pub fn bandwidth(&self, hw: &HardwareConfig) -> Option<f64> {
        self.level().and_then(|l| hw.bandwidth(l))
    }
}

/// Columns visited travelling from `src` to `dst`; both are cut to their
/// space levels. `None` if either is outside the configured hierarchy.
#[must_use]
pub fn column_path(hw: &HardwareConfig, src: &MLCoord, dst: &MLCoord) -> Option<Vec<MLCoord>> {
    let sd = hw.space_depth();
    let src = src.prefix(sd);
    let dst = dst.prefix(sd);
    hw.space_index(&src)?;
    hw.space_index(&dst)?;

    let mut levels = src.levels().to_vec();
    let mut path = vec![src];
    for (level, target) in dst.levels().iter().enumerate() {
        while let Some(next) = levels[level].step_toward(target) {
            levels[level] = next;
            path.push(MLCoord::from_levels(levels.clone()));
        }
    }
    Some(path)
}

/// Hops of a path of columns
#[must_use]
pub fn hops(path: &[MLCoord]) -> Vec<Hop> {
    path.windows(2)
        .map(|w| Hop {
            from: w[0].clone(),
            to: w[1].clone(),
        })
        .collect()
}

/// Check that every element of `path` is an in-range column and that
/// consecutive columns are adjacent. Returns a description of the first
/// fault.
///
/// # Errors
///
/// Returns the reason the path is not a chain of adjacent columns.
pub fn check_path(hw: &HardwareConfig, path: &[MLCoord]) -> std::result::Result<(), String> {
    let sd = hw.space_depth();
    for coord in path {
        if coord.depth() != sd {
            return Err(format!("{coord} is not a column ({sd} space levels)"));
        }
        if hw.space_index(coord).is_none() {
            return Err(format!("{coord} is outside the hierarchy"));
        }
    }
    for hop in hops(path) {
        let Some(level) = hop.level() else {
            return Err(format!("{} repeats", hop.from));
        };
        let adjacent = hop.from.levels()[level]
            .manhattan(&hop.to.levels()[level])
            .is_some_and(|d| d == 1)
            && hop.from.levels()[level + 1..] == hop.to.levels()[level + 1..];
        if !adjacent {
            return Err(format!("{} and {} are not neighbours", hop.from, hop.to));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(chip: [usize; 2], core: [usize; 2]) -> MLCoord {
        MLCoord::from_levels(vec![chip.into(), core.into()])
    }

    #[test]
    fn test_path_is_dimension_ordered() {
        let hw = HardwareConfig::single_chip(4, 4);
        let path = column_path(&hw, &col([0, 0], [0, 0]), &col([0, 0], [2, 1])).unwrap();
        assert_eq!(
            path,
            vec![
                col([0, 0], [0, 0]),
                col([0, 0], [1, 0]),
                col([0, 0], [2, 0]),
                col([0, 0], [2, 1]),
            ]
        );
        check_path(&hw, &path).unwrap();
        assert_eq!(hops(&path).len(), 3);
    }

    #[test]
    fn test_outer_level_first() {
        let hw = HardwareConfig::multi_chip((2, 1), (2, 2));
        let path = column_path(&hw, &col([0, 0], [1, 1]), &col([1, 0], [0, 1])).unwrap();
        let first = &hops(&path)[0];
        assert_eq!(first.level(), Some(0));
        assert_eq!(first.bandwidth(&hw), Some(4.0));
        assert_eq!(hops(&path)[1].bandwidth(&hw), Some(32.0));
    }

    #[test]
    fn test_same_column_has_no_hops() {
        let hw = HardwareConfig::single_chip(2, 2);
        let c = col([0, 0], [1, 1]);
        let path = column_path(&hw, &c.at_time(0, 1, stmap_chip::PiIndex::Axon), &c).unwrap();
        assert_eq!(path, vec![c]);
        assert!(hops(&path).is_empty());
    }

    #[test]
    fn test_rejects_jumps() {
        let hw = HardwareConfig::single_chip(4, 4);
        let err = check_path(&hw, &[col([0, 0], [0, 0]), col([0, 0], [2, 0])]).unwrap_err();
        assert!(err.contains("not neighbours"));
        assert!(column_path(&hw, &col([0, 0], [9, 0]), &col([0, 0], [0, 0])).is_none());
    }
}

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Three-dimensional extent or coordinate of a grid, thread block or thread.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse {value:?}: {source:?}")]
    Parse {
        value: String,
        source: Option<std::num::ParseIntError>,
    },
}

static DIM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\(?\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*\)?\s*$").expect("valid dim regex")
});

impl TryFrom<&str> for Dim {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let captures = DIM_REGEX.captures(value).ok_or_else(|| Error::Parse {
            value: value.to_string(),
            source: None,
        })?;
        let get_dim = |i: usize| {
            let dim = captures
                .get(i)
                .ok_or_else(|| Error::Parse {
                    value: value.to_string(),
                    source: None,
                })?
                .as_str();
            dim.parse().map_err(|err| Error::Parse {
                value: value.to_string(),
                source: Some(err),
            })
        };

        Ok(Self {
            x: get_dim(1)?,
            y: get_dim(2)?,
            z: get_dim(3)?,
        })
    }
}

impl std::str::FromStr for Dim {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::try_from(value)
    }
}

impl Default for Dim {
    fn default() -> Self {
        Self::ONE
    }
}

impl Dim {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };
    pub const ONE: Self = Self { x: 1, y: 1, z: 1 };

    #[must_use]
    #[inline]
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Number of elements spanned by this extent.
    #[must_use]
    #[inline]
    pub fn size(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }

    #[must_use]
    #[inline]
    pub fn into_tuple(&self) -> (u32, u32, u32) {
        (self.x, self.y, self.z)
    }
}

impl std::fmt::Display for Dim {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

impl From<u32> for Dim {
    #[inline]
    fn from(dim: u32) -> Self {
        Self { x: dim, y: 1, z: 1 }
    }
}

impl From<(u32, u32)> for Dim {
    #[inline]
    fn from(dim: (u32, u32)) -> Self {
        let (x, y) = dim;
        Self { x, y, z: 1 }
    }
}

impl From<(u32, u32, u32)> for Dim {
    #[inline]
    fn from(dim: (u32, u32, u32)) -> Self {
        let (x, y, z) = dim;
        Self { x, y, z }
    }
}

#[cfg(test)]
mod tests {
    use super::Dim;
    use color_eyre::eyre;
    use similar_asserts as diff;

    #[test]
    fn test_parse_dim() -> eyre::Result<()> {
        diff::assert_eq!(have: "(32,4,1)".parse::<Dim>()?, want: Dim::new(32, 4, 1));
        diff::assert_eq!(have: " 2 , 2,2 ".parse::<Dim>()?, want: Dim::new(2, 2, 2));
        assert!("(32,4)".parse::<Dim>().is_err());
        assert!("(a,b,c)".parse::<Dim>().is_err());
        Ok(())
    }

    #[test]
    fn test_dim_size() {
        diff::assert_eq!(have: Dim::from((16_u32, 16_u32)).size(), want: 256);
        diff::assert_eq!(have: Dim::from(128_u32).size(), want: 128);
        diff::assert_eq!(have: Dim::ZERO.size(), want: 0);
        diff::assert_eq!(have: Dim::new(4, 2, 1).to_string(), want: "(4,2,1)");
    }
}

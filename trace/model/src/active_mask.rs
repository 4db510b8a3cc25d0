use bitvec::{order::Lsb0, vec::BitVec};
use serde::{Deserialize, Serialize};

pub type Inner = BitVec<u32, Lsb0>;

/// Thread active mask.
///
/// Bitmask where a 1 at position i means that thread i of the thread block
/// is active for the current instruction.
/// Threads beyond the length of the mask are inactive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct ActiveMask(Inner);

impl ActiveMask {
    /// Active mask of `num_threads` threads, all of them inactive.
    #[must_use]
    pub fn inactive(num_threads: usize) -> Self {
        Self(Inner::repeat(false, num_threads))
    }

    /// Active mask of `num_threads` threads, all of them active.
    #[must_use]
    pub fn all_active(num_threads: usize) -> Self {
        Self(Inner::repeat(true, num_threads))
    }

    #[must_use]
    pub fn from_fn(num_threads: usize, is_active: impl Fn(usize) -> bool) -> Self {
        (0..num_threads).map(is_active).collect()
    }

    #[must_use]
    #[inline]
    pub fn is_active(&self, thread: usize) -> bool {
        self.0.get(thread).map_or(false, |bit| *bit)
    }

    /// Marks `thread` (in)active, growing the mask if needed.
    pub fn set_active(&mut self, thread: usize, active: bool) {
        if thread >= self.0.len() {
            self.0.resize(thread + 1, false);
        }
        self.0.set(thread, active);
    }

    /// Number of active threads.
    #[must_use]
    #[inline]
    pub fn count(&self) -> usize {
        self.0.count_ones()
    }

    /// Indices of the active threads in ascending order.
    pub fn active_threads(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter_ones()
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 32 bit warp mask, bit i corresponds to thread i.
impl From<u32> for ActiveMask {
    fn from(value: u32) -> Self {
        Self(Inner::from_element(value))
    }
}

impl FromIterator<bool> for ActiveMask {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::ops::Deref for ActiveMask {
    type Target = Inner;
    fn deref(&self) -> &Inner {
        &self.0
    }
}

impl Serialize for ActiveMask {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_bit_string())
    }
}

struct Visitor;

impl<'de> serde::de::Visitor<'de> for Visitor {
    type Value = ActiveMask;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a string of 0s and 1s with the highest thread first")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        value
            .chars()
            .rev()
            .map(|c| match c {
                '1' => Ok(true),
                '0' => Ok(false),
                other => Err(E::invalid_value(
                    serde::de::Unexpected::Char(other),
                    &self,
                )),
            })
            .collect()
    }
}

impl<'de> Deserialize<'de> for ActiveMask {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(Visitor)
    }
}

impl std::fmt::Display for ActiveMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_bit_string())
    }
}

/// Format as a binary string.
pub trait ToBitString {
    fn to_bit_string(&self) -> String;
}

impl<A, O> ToBitString for bitvec::slice::BitSlice<A, O>
where
    A: bitvec::store::BitStore,
    O: bitvec::order::BitOrder,
{
    fn to_bit_string(&self) -> String {
        self.iter()
            .rev()
            .map(|b| if *b { "1" } else { "0" })
            .collect::<Vec<_>>()
            .join("")
    }
}

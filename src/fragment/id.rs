use derive_more::{Display, From, Into};

/// Correlation identifier shared by every fragment of one message and by the
/// acknowledgements sent back for it.
///
/// # Examples
///
/// ```
/// use fragwire::fragment::FragmentId;
/// let id = FragmentId::new(42);
/// assert_eq!(id.get(), 42);
/// assert_eq!(id.to_string(), "0000002a");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into)]
#[display("{_0:08x}")]
pub struct FragmentId(u32);

impl FragmentId {
    /// Create an identifier from its numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Draw a fresh identifier uniformly at random.
    ///
    /// Ids only need to be unlikely to collide between concurrent messages
    /// towards the same peer; they are not a security boundary.
    #[must_use]
    pub fn random() -> Self { Self(rand::random()) }

    /// Return the numeric identifier.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }
}

/// A managed UTF-8 string with cached length.
///
/// `singleton` marks interned strings: they are registered in the VM's
/// singleton table and literals compare by reference. Collection drops the
/// table entry when nothing but the pool refers to the string.
#[derive(Debug)]
pub struct OxStr {
    pub(crate) chars: Box<str>,
    pub(crate) singleton: bool,
}

impl OxStr {
    pub fn new(s: impl Into<Box<str>>) -> Self {
        OxStr {
            chars: s.into(),
            singleton: false,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.chars
    }

    /// Byte length of the UTF-8 content.
    #[inline]
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }
}

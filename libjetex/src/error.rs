macro_rules! multi_error {
    ($name:ident($($manual:ident),*); $($err:ident = $obj:ty);*) => {
        pub mod $name {
            use backtrace::Backtrace;

            #[derive(Debug)]
            pub enum Inner {
                $($err($obj),)*
                $($manual),*
            }

            impl std::fmt::Display for Inner { fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { std::fmt::Debug::fmt(self, f) } }
            impl std::error::Error for Inner {}

            $(impl From<$obj> for Inner { fn from(value: $obj) -> Self { Self::$err(value) } })*

            pub struct Error {
                inner: Inner,
                backtrace: Backtrace
            }

            impl<Err> From<Err> for Error where Err: Into<Inner> {
                fn from(err: Err) -> Self {
                    Self {
                        inner: err.into(),
                        backtrace: Backtrace::new()
                    }
                }
            }

            impl std::error::Error for Error {}
            impl std::fmt::Display for Error {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { std::fmt::Debug::fmt(self, f) }
            }

            impl std::fmt::Debug for Error {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{:?}\n", &self.inner)?;
                    match std::env::var("RUST_BACKTRACE").as_ref().map(|i| i.as_ref()) {
                        Ok("full") => write!(f, "{:#?}", self.backtrace),
                        Ok("1") => write!(f, "{:?}", self.backtrace),
                        _ => write!(f, ""),
                    }
                }
            }
        }
    }
}

multi_error! { global();
    FragmentError = crate::error::FragmentError;
    TableError = crate::error::TableError;
    CodecError = crate::error::CodecError;
    IoError = std::io::Error;
    DecodeError = std::array::TryFromSliceError
}

pub type Result<T> = ::std::result::Result<T, global::Error>;
pub use global::Error;

/// Failures validating or mapping a single fragment file (spec.md §3.1, §7.1).
#[derive(Debug, Clone)]
pub enum FragmentError {
    InvalidMagic,
    UnsupportedVersion(u32),
    InvalidNBits(u8),
    PatternHasLowBits,
    InvalidKeySize(u8),
    ItemSmallerThanKey,
    MaxBelowMin,
    DisplacementOverflow,
    OffsetOverflow,
    TableSizeExceedsHeaderBounds,
    TableSizeExceedsFileSize,
    HeaderTooShort,
}

impl std::error::Error for FragmentError {}

impl std::fmt::Display for FragmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Failures assembling a table from a set of fragments (spec.md §4.2, §7.2).
#[derive(Debug, Clone)]
pub enum TableError {
    NoFragments,
    NBitsTooLarge(u8),
    SlotCountOverflow,
}

impl std::error::Error for TableError {}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Failures encoding or decoding a wire datagram (spec.md §4.4, §7.3).
#[derive(Debug, Clone)]
pub enum CodecError {
    BufferTooSmall,
    LengthMismatch,
    WrongType,
    InvalidDestinationKind,
    InvalidKeyLength,
    InvalidCorrelationLength,
    PacketTooLarge,
}

impl std::error::Error for CodecError {}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

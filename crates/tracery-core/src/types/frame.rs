//! Frame types flowing into and out of the resolver.

use std::fmt;
use std::path::PathBuf;

use super::Address;

/// One captured address, already attributed to the object that contains it.
///
/// Produced by an [`ObjectLocator`](crate::trace::ObjectLocator); the resolver
/// never computes load bias itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectFrame
{
    /// Address as captured in the traced process
    pub raw_address: Address,
    /// Address relative to the object's load base
    pub object_address: Address,
    /// Path of the object file holding the code
    pub object_path: PathBuf,
}

impl ObjectFrame
{
    pub fn new(raw_address: Address, object_address: Address, object_path: impl Into<PathBuf>) -> Self
    {
        Self {
            raw_address,
            object_address,
            object_path: object_path.into(),
        }
    }
}

/// A source-level view of one frame.
///
/// Unresolved parts are empty strings or `None`, never sentinel values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedFrame
{
    pub raw_address: Address,
    pub object_address: Address,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub filename: String,
    pub symbol: String,
    /// `true` for frames synthesized from an inlined call
    pub is_inline: bool,
}

impl ResolvedFrame
{
    /// A frame carrying only the addresses of `frame`.
    pub fn unresolved(frame: &ObjectFrame) -> Self
    {
        Self {
            raw_address: frame.raw_address,
            object_address: frame.object_address,
            ..Self::default()
        }
    }

    /// A frame for an address that never made it to an object.
    pub fn from_raw(raw_address: Address) -> Self
    {
        Self {
            raw_address,
            ..Self::default()
        }
    }

    /// True when no symbol or source information was recovered.
    pub fn is_unresolved(&self) -> bool
    {
        self.symbol.is_empty() && self.filename.is_empty() && self.line.is_none() && self.column.is_none()
    }
}

impl fmt::Display for ResolvedFrame
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        if self.is_inline {
            write!(f, "(inlined)          ")?;
        } else {
            write!(f, "{}", self.raw_address)?;
        }
        let symbol = if self.symbol.is_empty() { "??" } else { &self.symbol };
        write!(f, " in {symbol}")?;
        if !self.filename.is_empty() {
            write!(f, " at {}", self.filename)?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
                if let Some(column) = self.column {
                    write!(f, ":{column}")?;
                }
            }
        }
        Ok(())
    }
}

/// Resolver output for one address.
///
/// `inlines` are the synthesized frames for inlined calls, innermost first.
/// `frame` is the real (non-inline) frame of the enclosing function. Every
/// entry shares the same addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameWithInlines
{
    pub frame: ResolvedFrame,
    pub inlines: Vec<ResolvedFrame>,
}

impl FrameWithInlines
{
    pub fn new(frame: ResolvedFrame) -> Self
    {
        Self {
            frame,
            inlines: Vec::new(),
        }
    }

    /// All frames for this address, innermost first.
    pub fn into_frames(self) -> Vec<ResolvedFrame>
    {
        let mut frames = self.inlines;
        frames.push(self.frame);
        frames
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_unresolved_frame_keeps_addresses()
    {
        let object = ObjectFrame::new(Address::new(0x5555_0000_1234), Address::new(0x1234), "/bin/app");
        let frame = ResolvedFrame::unresolved(&object);
        assert_eq!(frame.raw_address, Address::new(0x5555_0000_1234));
        assert_eq!(frame.object_address, Address::new(0x1234));
        assert!(frame.is_unresolved());
        assert!(!frame.is_inline);
    }

    #[test]
    fn test_display_with_location()
    {
        let frame = ResolvedFrame {
            raw_address: Address::new(0x10),
            symbol: "foo".to_string(),
            filename: "f.c".to_string(),
            line: Some(10),
            column: Some(3),
            ..ResolvedFrame::default()
        };
        assert_eq!(frame.to_string(), "0x0000000000000010 in foo at f.c:10:3");
    }

    #[test]
    fn test_display_unresolved()
    {
        let frame = ResolvedFrame::from_raw(Address::new(0x10));
        assert_eq!(frame.to_string(), "0x0000000000000010 in ??");
    }

    #[test]
    fn test_into_frames_orders_inlines_first()
    {
        let outer = ResolvedFrame {
            symbol: "bar".to_string(),
            ..ResolvedFrame::default()
        };
        let inline = ResolvedFrame {
            symbol: "foo".to_string(),
            is_inline: true,
            ..ResolvedFrame::default()
        };
        let frames = FrameWithInlines {
            frame: outer,
            inlines: vec![inline],
        }
        .into_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].symbol, "foo");
        assert!(frames[0].is_inline);
        assert_eq!(frames[1].symbol, "bar");
        assert!(!frames[1].is_inline);
    }
}

//! Command Input Encoder
//!
//! Every string-store Read/RMW carries a compact binary input telling the
//! store callbacks what to do:
//!
//! ```text
//! ┌──────────────────┬────────┬───────┬──────────────────────────────┐
//! │ remaining_length │ opcode │ flags │ opcode-specific fixed fields │
//! │ i32 LE           │ u8     │ u8    │ 0..=16 bytes                 │
//! └──────────────────┴────────┴───────┴──────────────────────────────┘
//! ```
//!
//! `remaining_length` excludes itself, so a reader can skip trailing fields
//! it does not understand. Field layouts per opcode:
//!
//! | Opcode                  | Fields                                           |
//! |-------------------------|--------------------------------------------------|
//! | GETRANGE                | `{offset:i32, len:i32}`                          |
//! | SETEXNX/SETEXXX, APPEND | `{value_len:i32, value_addr:i64}`                |
//! | SETRANGE                | `{offset:i32, value_len:i32, value_addr:i64}`    |
//! | INCRBY/DECRBY           | `{magnitude:i64}`                                |
//! | EXPIRE/PEXPIRE          | `{expire_option:u8}`                             |
//! | everything else         | none                                             |
//!
//! The expiration instant of SETEXNX/SETEXXX, GETEX and EXPIRE travels in
//! the input's extra-metadata field, not in the byte layout.
//!
//! ## Design
//!
//! The fixed part lives in an inline array of [`MAX_INPUT_SIZE`] bytes, so
//! building an input never allocates. Variable-length data (an APPEND value)
//! is attached by reference; `value_addr` is the data's offset inside that
//! attachment and is bounds-checked on decode. An input that must outlive the
//! call (a pending operation) is detached, which copies the attachment to the
//! heap.

use crate::error::{KvError, Result};
use crate::storage::clock::TimeUnit;
use std::borrow::Cow;

/// Length prefix plus `{opcode, flags}`.
pub const HEADER_SIZE: usize = 4 + 2;

/// Largest opcode-specific field block.
pub const MAX_FIELDS_SIZE: usize = 16;

/// Capacity of the inline layout buffer.
pub const MAX_INPUT_SIZE: usize = HEADER_SIZE + MAX_FIELDS_SIZE;

/// Input flag bits.
pub mod flags {
    /// GETEX: drop the expiration while reading.
    pub const PERSIST: u8 = 0x01;
}

/// Operation selector understood by the string-store callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Plain read answering with a RESP bulk string
    None = 0,
    /// Plain read answering with the raw value
    Get = 1,
    GetEx = 2,
    GetDel = 3,
    GetRange = 4,
    Ttl = 5,
    PTtl = 6,
    ExpireTime = 7,
    PExpireTime = 8,
    /// Conditional write: only if the key is absent
    SetExNx = 9,
    /// Conditional write: only if the key is present
    SetExXx = 10,
    Append = 11,
    SetRange = 12,
    IncrBy = 13,
    DecrBy = 14,
    Expire = 15,
    PExpire = 16,
    Persist = 17,
}

impl TryFrom<u8> for Opcode {
    type Error = KvError;

    fn try_from(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => Opcode::None,
            1 => Opcode::Get,
            2 => Opcode::GetEx,
            3 => Opcode::GetDel,
            4 => Opcode::GetRange,
            5 => Opcode::Ttl,
            6 => Opcode::PTtl,
            7 => Opcode::ExpireTime,
            8 => Opcode::PExpireTime,
            9 => Opcode::SetExNx,
            10 => Opcode::SetExXx,
            11 => Opcode::Append,
            12 => Opcode::SetRange,
            13 => Opcode::IncrBy,
            14 => Opcode::DecrBy,
            15 => Opcode::Expire,
            16 => Opcode::PExpire,
            17 => Opcode::Persist,
            other => {
                return Err(KvError::MalformedInput(format!("unknown opcode {other}")));
            }
        })
    }
}

/// Conditional semantics of the EXPIRE family. A key without an expiration
/// counts as expiring never (infinitely far away).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ExpireOption {
    #[default]
    Unconditional = 0,
    /// NX
    OnlyIfNoExpiry = 1,
    /// XX
    OnlyIfHasExpiry = 2,
    /// GT
    OnlyIfGreater = 4,
    /// LT
    OnlyIfLess = 8,
}

impl ExpireOption {
    pub fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => ExpireOption::Unconditional,
            1 => ExpireOption::OnlyIfNoExpiry,
            2 => ExpireOption::OnlyIfHasExpiry,
            4 => ExpireOption::OnlyIfGreater,
            8 => ExpireOption::OnlyIfLess,
            other => {
                return Err(KvError::MalformedInput(format!(
                    "unknown expire option {other:#04x}"
                )));
            }
        })
    }

    /// Whether `new_expire_at` may replace `current` (0 = no expiration).
    pub fn allows(self, current: i64, new_expire_at: i64) -> bool {
        match self {
            ExpireOption::Unconditional => true,
            ExpireOption::OnlyIfNoExpiry => current == 0,
            ExpireOption::OnlyIfHasExpiry => current != 0,
            ExpireOption::OnlyIfGreater => current != 0 && new_expire_at > current,
            ExpireOption::OnlyIfLess => current == 0 || new_expire_at < current,
        }
    }
}

/// Expiration argument of GETEX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetExpiry {
    /// Read only
    Unchanged,
    /// Read and clear the expiration
    Persist,
    /// Read and set the absolute expiration (ticks)
    At(i64),
}

/// A string-store command, decoded from a [`CommandInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringCommand<'a> {
    ReadResp,
    Get,
    GetRange { offset: i32, len: i32 },
    Ttl(TimeUnit),
    ExpireTime(TimeUnit),
    GetEx(GetExpiry),
    GetDel,
    SetIfAbsent { value: &'a [u8], expire_at: i64 },
    SetIfPresent { value: &'a [u8], expire_at: i64 },
    Append { value: &'a [u8] },
    SetRange { offset: i32, value: &'a [u8] },
    Increment { magnitude: u64, negative: bool },
    Expire { expire_at: i64, option: ExpireOption },
    Persist,
}

/// Encoded command input.
#[derive(Debug, Clone)]
pub struct CommandInput<'a> {
    raw: [u8; MAX_INPUT_SIZE],
    len: usize,
    extra_metadata: i64,
    attachment: Cow<'a, [u8]>,
    /// Set when the builder could not encode a field
    fault: Option<String>,
}

impl Default for CommandInput<'_> {
    fn default() -> Self {
        Self::new(Opcode::None)
    }
}

impl<'a> CommandInput<'a> {
    /// Input with no fields.
    pub fn new(opcode: Opcode) -> Self {
        InputBuilder::new(opcode).build()
    }

    /// GETRANGE of `len` bytes from `offset`; a negative offset counts
    /// back from the end of the value.
    pub fn get_range(offset: i32, len: i32) -> Self {
        InputBuilder::new(Opcode::GetRange)
            .put_i32(offset)
            .put_i32(len)
            .build()
    }

    pub fn get_ex(expiry: GetExpiry) -> Self {
        let builder = InputBuilder::new(Opcode::GetEx);
        match expiry {
            GetExpiry::Unchanged => builder.build(),
            GetExpiry::Persist => builder.flags(flags::PERSIST).build(),
            GetExpiry::At(ticks) => builder.extra_metadata(ticks).build(),
        }
    }

    /// SETEXNX / SETEXXX carrying `value` and an optional expiration.
    pub fn set_conditional(opcode: Opcode, value: &'a [u8], expire_at: i64) -> Self {
        debug_assert!(matches!(opcode, Opcode::SetExNx | Opcode::SetExXx));
        InputBuilder::new(opcode)
            .value(value)
            .extra_metadata(expire_at)
            .build()
    }

    pub fn append(value: &'a [u8]) -> Self {
        InputBuilder::new(Opcode::Append).value(value).build()
    }

    pub fn set_range(offset: i32, value: &'a [u8]) -> Self {
        InputBuilder::new(Opcode::SetRange)
            .put_i32(offset)
            .value(value)
            .build()
    }

    /// INCRBY for non-negative deltas, DECRBY with the magnitude otherwise.
    pub fn increment(delta: i64) -> Self {
        let opcode = if delta < 0 {
            Opcode::DecrBy
        } else {
            Opcode::IncrBy
        };
        InputBuilder::new(opcode)
            .put_i64(delta.unsigned_abs() as i64)
            .build()
    }

    pub fn expire(opcode: Opcode, expire_at: i64, option: ExpireOption) -> Self {
        debug_assert!(matches!(opcode, Opcode::Expire | Opcode::PExpire));
        InputBuilder::new(opcode)
            .put_u8(option as u8)
            .extra_metadata(expire_at)
            .build()
    }

    pub fn opcode(&self) -> Result<Opcode> {
        Opcode::try_from(self.raw[4])
    }

    pub fn flags(&self) -> u8 {
        self.raw[5]
    }

    pub fn extra_metadata(&self) -> i64 {
        self.extra_metadata
    }

    /// The encoded layout, length prefix included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..self.len]
    }

    /// Copy of this input that owns its attachment.
    pub fn detach(&self) -> CommandInput<'static> {
        CommandInput {
            raw: self.raw,
            len: self.len,
            extra_metadata: self.extra_metadata,
            attachment: Cow::Owned(self.attachment.to_vec()),
            fault: self.fault.clone(),
        }
    }

    /// Validates the layout and decodes it.
    pub fn decode(&self) -> Result<StringCommand<'_>> {
        if let Some(fault) = &self.fault {
            return Err(KvError::MalformedInput(fault.clone()));
        }
        let remaining = self.read_i32(0)?;
        if remaining < 0 || remaining as usize != self.len - 4 {
            return Err(KvError::MalformedInput(format!(
                "remaining length {remaining} does not match {} encoded bytes",
                self.len - 4
            )));
        }

        let fields = HEADER_SIZE;
        let expire_at = self.extra_metadata;
        Ok(match self.opcode()? {
            Opcode::None => StringCommand::ReadResp,
            Opcode::Get => StringCommand::Get,
            Opcode::GetRange => StringCommand::GetRange {
                offset: self.read_i32(fields)?,
                len: self.read_i32(fields + 4)?,
            },
            Opcode::Ttl => StringCommand::Ttl(TimeUnit::Seconds),
            Opcode::PTtl => StringCommand::Ttl(TimeUnit::Milliseconds),
            Opcode::ExpireTime => StringCommand::ExpireTime(TimeUnit::Seconds),
            Opcode::PExpireTime => StringCommand::ExpireTime(TimeUnit::Milliseconds),
            Opcode::GetEx => StringCommand::GetEx(if expire_at > 0 {
                GetExpiry::At(expire_at)
            } else if self.flags() & flags::PERSIST != 0 {
                GetExpiry::Persist
            } else {
                GetExpiry::Unchanged
            }),
            Opcode::GetDel => StringCommand::GetDel,
            Opcode::SetExNx => StringCommand::SetIfAbsent {
                value: self.value_at(fields)?,
                expire_at,
            },
            Opcode::SetExXx => StringCommand::SetIfPresent {
                value: self.value_at(fields)?,
                expire_at,
            },
            Opcode::Append => StringCommand::Append {
                value: self.value_at(fields)?,
            },
            Opcode::SetRange => StringCommand::SetRange {
                offset: self.read_i32(fields)?,
                value: self.value_at(fields + 4)?,
            },
            Opcode::IncrBy | Opcode::DecrBy => StringCommand::Increment {
                magnitude: self.read_i64(fields)? as u64,
                negative: self.opcode()? == Opcode::DecrBy,
            },
            Opcode::Expire | Opcode::PExpire => StringCommand::Expire {
                expire_at,
                option: ExpireOption::from_u8(self.read_u8(fields)?)?,
            },
            Opcode::Persist => StringCommand::Persist,
        })
    }

    fn field(&self, at: usize, width: usize) -> Result<&[u8]> {
        self.as_bytes().get(at..at + width).ok_or_else(|| {
            KvError::MalformedInput(format!("field at {at} overruns {} bytes", self.len))
        })
    }

    fn read_u8(&self, at: usize) -> Result<u8> {
        Ok(self.field(at, 1)?[0])
    }

    fn read_i32(&self, at: usize) -> Result<i32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.field(at, 4)?);
        Ok(i32::from_le_bytes(raw))
    }

    fn read_i64(&self, at: usize) -> Result<i64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.field(at, 8)?);
        Ok(i64::from_le_bytes(raw))
    }

    /// Resolves a `{value_len, value_addr}` pair against the attachment.
    fn value_at(&self, at: usize) -> Result<&[u8]> {
        let len = self.read_i32(at)?;
        let addr = self.read_i64(at + 4)?;
        let (Ok(len), Ok(addr)) = (usize::try_from(len), usize::try_from(addr)) else {
            return Err(KvError::MalformedInput(format!(
                "negative value reference ({len} bytes at {addr})"
            )));
        };
        self.attachment
            .get(addr..addr.saturating_add(len))
            .ok_or_else(|| {
                KvError::MalformedInput(format!(
                    "value reference ({len} bytes at {addr}) outside {}-byte attachment",
                    self.attachment.len()
                ))
            })
    }
}

/// Bounds-checked builder for [`CommandInput`].
///
/// Fields past [`MAX_INPUT_SIZE`] and attached values longer than
/// `i32::MAX` bytes are not encoded. The built input then fails to decode
/// with [`KvError::MalformedInput`], and [`InputBuilder::try_build`] reports
/// the same error up front.
#[derive(Debug)]
pub struct InputBuilder<'a> {
    input: CommandInput<'a>,
}

impl<'a> InputBuilder<'a> {
    pub fn new(opcode: Opcode) -> Self {
        let mut raw = [0u8; MAX_INPUT_SIZE];
        raw[4] = opcode as u8;
        Self {
            input: CommandInput {
                raw,
                len: HEADER_SIZE,
                extra_metadata: 0,
                attachment: Cow::Borrowed(&[]),
                fault: None,
            },
        }
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.input.raw[5] = flags;
        self
    }

    pub fn extra_metadata(mut self, value: i64) -> Self {
        self.input.extra_metadata = value;
        self
    }

    pub fn put_u8(self, value: u8) -> Self {
        self.put(&[value])
    }

    pub fn put_i32(self, value: i32) -> Self {
        self.put(&value.to_le_bytes())
    }

    pub fn put_i64(self, value: i64) -> Self {
        self.put(&value.to_le_bytes())
    }

    /// Attaches `value` by reference and writes its `{len, addr}` fields.
    pub fn value(mut self, value: &'a [u8]) -> Self {
        let addr = self.input.attachment.len();
        let Ok(len) = i32::try_from(value.len()) else {
            return self.fail(format!("{}-byte value exceeds i32::MAX", value.len()));
        };
        self.input.attachment = match std::mem::take(&mut self.input.attachment) {
            Cow::Borrowed([]) => Cow::Borrowed(value),
            existing => {
                let mut owned = existing.into_owned();
                owned.extend_from_slice(value);
                Cow::Owned(owned)
            }
        };
        self.put_i32(len).put_i64(addr as i64)
    }

    fn put(mut self, bytes: &[u8]) -> Self {
        let at = self.input.len;
        let end = at + bytes.len();
        if end > MAX_INPUT_SIZE {
            return self.fail(format!(
                "{}-byte field at {at} overflows the {MAX_INPUT_SIZE}-byte layout",
                bytes.len()
            ));
        }
        self.input.raw[at..end].copy_from_slice(bytes);
        self.input.len = end;
        self
    }

    /// Records the first encoding failure; later fields are dropped.
    fn fail(mut self, reason: String) -> Self {
        self.input.fault.get_or_insert(reason);
        self
    }

    pub fn build(mut self) -> CommandInput<'a> {
        let remaining = (self.input.len - 4) as i32;
        self.input.raw[..4].copy_from_slice(&remaining.to_le_bytes());
        self.input
    }

    /// Like [`build`](Self::build), failing if any field could not be encoded.
    pub fn try_build(self) -> Result<CommandInput<'a>> {
        let input = self.build();
        match &input.fault {
            Some(fault) => Err(KvError::MalformedInput(fault.clone())),
            None => Ok(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let input = CommandInput::new(Opcode::Persist);
        assert_eq!(input.as_bytes(), &[2, 0, 0, 0, Opcode::Persist as u8, 0]);
        assert_eq!(input.decode(), Ok(StringCommand::Persist));
    }

    #[test]
    fn test_remaining_length_counts_fields() {
        let input = CommandInput::get_range(-4, 3);
        assert_eq!(input.as_bytes().len(), HEADER_SIZE + 8);
        assert_eq!(&input.as_bytes()[..4], &10i32.to_le_bytes());
        assert_eq!(
            input.decode(),
            Ok(StringCommand::GetRange { offset: -4, len: 3 })
        );
    }

    #[test]
    fn test_value_attached_by_reference() {
        let value = b"appended".to_vec();
        let input = CommandInput::append(&value);

        // {value_len:i32, value_addr:i64}
        assert_eq!(input.as_bytes().len(), HEADER_SIZE + 12);
        match input.decode() {
            Ok(StringCommand::Append { value: decoded }) => {
                assert_eq!(decoded, b"appended");
                assert_eq!(decoded.as_ptr(), value.as_ptr());
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_set_range_layout_is_at_capacity() {
        let input = CommandInput::set_range(7, b"xyz");
        assert_eq!(input.as_bytes().len(), MAX_INPUT_SIZE);
        assert_eq!(
            input.decode(),
            Ok(StringCommand::SetRange {
                offset: 7,
                value: b"xyz"
            })
        );
    }

    #[test]
    fn test_increment_encodes_magnitude_and_direction() {
        assert_eq!(
            CommandInput::increment(5).decode(),
            Ok(StringCommand::Increment {
                magnitude: 5,
                negative: false
            })
        );
        assert_eq!(
            CommandInput::increment(-3).decode(),
            Ok(StringCommand::Increment {
                magnitude: 3,
                negative: true
            })
        );
        assert_eq!(
            CommandInput::increment(i64::MIN).decode(),
            Ok(StringCommand::Increment {
                magnitude: 1u64 << 63,
                negative: true
            })
        );
    }

    #[test]
    fn test_expire_option_after_header() {
        let input = CommandInput::expire(Opcode::PExpire, 1234, ExpireOption::OnlyIfLess);
        assert_eq!(input.as_bytes().len(), HEADER_SIZE + 1);
        assert_eq!(input.as_bytes()[HEADER_SIZE], ExpireOption::OnlyIfLess as u8);
        assert_eq!(input.extra_metadata(), 1234);
        assert_eq!(
            input.decode(),
            Ok(StringCommand::Expire {
                expire_at: 1234,
                option: ExpireOption::OnlyIfLess
            })
        );
    }

    #[test]
    fn test_get_ex_variants() {
        assert_eq!(
            CommandInput::get_ex(GetExpiry::Unchanged).decode(),
            Ok(StringCommand::GetEx(GetExpiry::Unchanged))
        );
        assert_eq!(
            CommandInput::get_ex(GetExpiry::Persist).decode(),
            Ok(StringCommand::GetEx(GetExpiry::Persist))
        );
        assert_eq!(
            CommandInput::get_ex(GetExpiry::At(99)).decode(),
            Ok(StringCommand::GetEx(GetExpiry::At(99)))
        );
    }

    #[test]
    fn test_detach_keeps_value() {
        let detached = {
            let value = b"short lived".to_vec();
            CommandInput::set_conditional(Opcode::SetExNx, &value, 0).detach()
        };
        assert_eq!(
            detached.decode(),
            Ok(StringCommand::SetIfAbsent {
                value: b"short lived",
                expire_at: 0
            })
        );
    }

    #[test]
    fn test_decode_rejects_bad_layouts() {
        let mut input = CommandInput::append(b"abc");
        // value_len beyond the attachment
        input.raw[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&10i32.to_le_bytes());
        assert!(matches!(input.decode(), Err(KvError::MalformedInput(_))));

        let mut input = CommandInput::new(Opcode::Get);
        input.raw[4] = 200;
        assert!(matches!(input.decode(), Err(KvError::MalformedInput(_))));

        let mut input = CommandInput::get_range(0, 1);
        input.raw[..4].copy_from_slice(&3i32.to_le_bytes());
        assert!(matches!(input.decode(), Err(KvError::MalformedInput(_))));
    }

    #[test]
    fn test_builder_overflow_is_reported_not_panicking() {
        let input = InputBuilder::new(Opcode::IncrBy)
            .put_i64(1)
            .put_i64(2)
            .put_i64(3)
            .build();
        assert_eq!(input.as_bytes().len(), HEADER_SIZE + MAX_FIELDS_SIZE);
        assert!(matches!(input.decode(), Err(KvError::MalformedInput(_))));

        let result = InputBuilder::new(Opcode::SetRange)
            .put_i32(0)
            .value(b"fits")
            .put_u8(1)
            .try_build();
        assert!(matches!(result, Err(KvError::MalformedInput(_))));

        assert!(InputBuilder::new(Opcode::Append).value(b"ok").try_build().is_ok());
    }

    #[test]
    fn test_expire_option_semantics() {
        use ExpireOption::*;
        assert!(Unconditional.allows(0, 5));
        assert!(OnlyIfNoExpiry.allows(0, 5));
        assert!(!OnlyIfNoExpiry.allows(3, 5));
        assert!(OnlyIfHasExpiry.allows(3, 5));
        assert!(!OnlyIfHasExpiry.allows(0, 5));
        assert!(OnlyIfGreater.allows(3, 5));
        assert!(!OnlyIfGreater.allows(0, 5));
        assert!(!OnlyIfGreater.allows(7, 5));
        assert!(OnlyIfLess.allows(0, 5));
        assert!(OnlyIfLess.allows(7, 5));
        assert!(!OnlyIfLess.allows(3, 5));
    }
}

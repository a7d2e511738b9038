use bytes::{BufMut, BytesMut};

use crate::{util, StunError};

/// TURN ChannelData message.
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Channel Number        |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// /                       Application Data                        /
/// /                                                               /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Channel numbers live in 0x4000..=0x7FFE, so the top two bits of a
/// ChannelData message are always `01` and can never collide with a
/// STUN header (`00`). Length counts application data only. Frames are
/// padded to a 4-byte boundary on stream transports and never on packet
/// transports.
#[derive(Debug)]
pub struct ChannelData<'a> {
    /// application data.
    pub bytes: &'a [u8],
    /// channel number.
    pub number: u16,
}

impl ChannelData<'_> {
    pub const MIN: u16 = 0x4000;
    pub const MAX: u16 = 0x7FFE;

    /// whether a channel number is inside the valid binding range.
    pub fn valid_number(number: u16) -> bool {
        (Self::MIN..=Self::MAX).contains(&number)
    }

    /// frame application data for a channel.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use stun::ChannelData;
    ///
    /// let mut buf = BytesMut::with_capacity(32);
    /// ChannelData::encode(0x4000, b"panda", &mut buf, false);
    /// assert_eq!(&buf[..], &[0x40, 0x00, 0x00, 0x05, 0x70, 0x61, 0x6e, 0x64, 0x61]);
    ///
    /// let mut buf = BytesMut::with_capacity(32);
    /// ChannelData::encode(0x4000, b"panda", &mut buf, true);
    /// assert_eq!(
    ///     &buf[..],
    ///     &[0x40, 0x00, 0x00, 0x05, 0x70, 0x61, 0x6e, 0x64, 0x61, 0x00, 0x00, 0x00]
    /// );
    /// ```
    pub fn encode(number: u16, bytes: &[u8], buf: &mut BytesMut, is_stream: bool) {
        buf.put_u16(number);
        buf.put_u16(bytes.len() as u16);
        buf.put(bytes);

        if is_stream {
            let pad = util::pad_size(bytes.len());
            if pad > 0 {
                buf.put(&[0u8; 4][..pad]);
            }
        }
    }

    /// total wire size of the frame starting at `bytes`, for stream
    /// re-framing.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use stun::ChannelData;
    ///
    /// let buffer = [0x40u8, 0x00, 0x00, 0x05];
    /// assert_eq!(ChannelData::message_size(&buffer, false).unwrap(), 9);
    /// assert_eq!(ChannelData::message_size(&buffer, true).unwrap(), 12);
    /// ```
    pub fn message_size(bytes: &[u8], is_stream: bool) -> Result<usize, StunError> {
        if bytes.len() < 4 || bytes[0] >> 6 != 1 {
            return Err(StunError::Format);
        }

        let mut size = util::as_u16(&bytes[2..4]) as usize + 4;
        if is_stream {
            size += util::pad_size(size);
        }

        Ok(size)
    }
}

impl<'a> TryFrom<&'a [u8]> for ChannelData<'a> {
    type Error = StunError;

    /// # Unit Test
    ///
    /// ```
    /// use stun::ChannelData;
    ///
    /// let buffer = [0x40u8, 0x00, 0x00, 0x05, 0x70, 0x61, 0x6e, 0x64, 0x61];
    ///
    /// let data = ChannelData::try_from(&buffer[..]).unwrap();
    /// assert_eq!(data.number, 0x4000);
    /// assert_eq!(data.bytes, b"panda");
    /// ```
    fn try_from(bytes: &'a [u8]) -> Result<Self, Self::Error> {
        if bytes.len() < 4 {
            return Err(StunError::Format);
        }

        let number = util::as_u16(&bytes[..2]);
        if !Self::valid_number(number) {
            return Err(StunError::Format);
        }

        let size = util::as_u16(&bytes[2..4]) as usize;
        if size > bytes.len() - 4 {
            return Err(StunError::Format);
        }

        Ok(Self {
            bytes: &bytes[4..4 + size],
            number,
        })
    }
}

impl AsRef<[u8]> for ChannelData<'_> {
    fn as_ref(&self) -> &[u8] {
        self.bytes
    }
}

use crate::StunError;

/// STUN message class.
///
/// The class is encoded into bits 4 and 8 of the 16-bit message type,
/// interleaved with the method bits.
#[repr(u16)]
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Kind {
    Request = 0x0000,
    Indication = 0x0010,
    Response = 0x0100,
    Error = 0x0110,
}

/// STUN Methods Registry
///
/// [RFC5389]: https://datatracker.ietf.org/doc/html/rfc5389
/// [RFC5766]: https://datatracker.ietf.org/doc/html/rfc5766
/// [RFC6062]: https://datatracker.ietf.org/doc/html/rfc6062
///
/// A STUN method is a hex number in the range 0x000-0x0FF:
///
/// * 0x001: Binding ([RFC5389])
/// * 0x003: Allocate ([RFC5766])
/// * 0x004: Refresh ([RFC5766])
/// * 0x006: Send ([RFC5766], indication only)
/// * 0x007: Data ([RFC5766], indication only)
/// * 0x008: CreatePermission ([RFC5766])
/// * 0x009: ChannelBind ([RFC5766])
/// * 0x00A: Connect ([RFC6062])
/// * 0x00B: ConnectionBind ([RFC6062])
/// * 0x00C: ConnectionAttempt ([RFC6062], indication only)
///
/// The TCP-relay methods of [RFC6062] are recognized so their messages
/// decode; nothing beyond the codepoints is implemented for them.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Method {
    Binding(Kind),
    Allocate(Kind),
    Refresh(Kind),
    CreatePermission(Kind),
    ChannelBind(Kind),
    Connect(Kind),
    ConnectionBind(Kind),
    SendIndication,
    DataIndication,
    ConnectionAttempt,
}

impl Method {
    /// # Unit Test
    ///
    /// ```
    /// use stun::{Kind, Method};
    ///
    /// assert_eq!(Method::Binding(Kind::Request).kind(), Kind::Request);
    /// assert_eq!(Method::SendIndication.kind(), Kind::Indication);
    /// ```
    pub fn kind(&self) -> Kind {
        match self {
            Self::Binding(kind)
            | Self::Allocate(kind)
            | Self::Refresh(kind)
            | Self::CreatePermission(kind)
            | Self::ChannelBind(kind)
            | Self::Connect(kind)
            | Self::ConnectionBind(kind) => *kind,
            Self::SendIndication | Self::DataIndication | Self::ConnectionAttempt => {
                Kind::Indication
            }
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind() == Kind::Request
    }

    pub fn is_error(&self) -> bool {
        self.kind() == Kind::Error
    }

    /// The success-response method answering this request.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use stun::{Kind, Method};
    ///
    /// let req = Method::Allocate(Kind::Request);
    /// assert_eq!(req.response(), Method::Allocate(Kind::Response));
    /// ```
    pub fn response(&self) -> Method {
        self.with_kind(Kind::Response)
    }

    /// The error-response method answering this request.
    pub fn error_response(&self) -> Method {
        self.with_kind(Kind::Error)
    }

    fn with_kind(&self, kind: Kind) -> Method {
        match self {
            Self::Binding(_) => Self::Binding(kind),
            Self::Allocate(_) => Self::Allocate(kind),
            Self::Refresh(_) => Self::Refresh(kind),
            Self::CreatePermission(_) => Self::CreatePermission(kind),
            Self::ChannelBind(_) => Self::ChannelBind(kind),
            Self::Connect(_) => Self::Connect(kind),
            Self::ConnectionBind(_) => Self::ConnectionBind(kind),
            other => *other,
        }
    }
}

impl TryFrom<u16> for Method {
    type Error = StunError;

    /// # Unit Test
    ///
    /// ```
    /// use stun::{Kind, Method};
    ///
    /// assert_eq!(Method::try_from(0x0001).unwrap(), Method::Binding(Kind::Request));
    /// assert_eq!(Method::try_from(0x0101).unwrap(), Method::Binding(Kind::Response));
    /// assert_eq!(Method::try_from(0x0111).unwrap(), Method::Binding(Kind::Error));
    /// assert_eq!(Method::try_from(0x0003).unwrap(), Method::Allocate(Kind::Request));
    /// assert_eq!(Method::try_from(0x0016).unwrap(), Method::SendIndication);
    /// assert_eq!(Method::try_from(0x0017).unwrap(), Method::DataIndication);
    /// assert!(Method::try_from(0x0013).is_err());
    /// ```
    fn try_from(value: u16) -> Result<Self, StunError> {
        let kind = match value & 0x0110 {
            0x0000 => Kind::Request,
            0x0010 => Kind::Indication,
            0x0100 => Kind::Response,
            _ => Kind::Error,
        };

        Ok(match (value & !0x0110, kind) {
            (0x001, _) => Self::Binding(kind),
            (0x003, Kind::Indication) => return Err(StunError::UnknownMethod(value)),
            (0x003, _) => Self::Allocate(kind),
            (0x004, Kind::Indication) => return Err(StunError::UnknownMethod(value)),
            (0x004, _) => Self::Refresh(kind),
            (0x006, Kind::Indication) => Self::SendIndication,
            (0x007, Kind::Indication) => Self::DataIndication,
            (0x008, Kind::Indication) => return Err(StunError::UnknownMethod(value)),
            (0x008, _) => Self::CreatePermission(kind),
            (0x009, Kind::Indication) => return Err(StunError::UnknownMethod(value)),
            (0x009, _) => Self::ChannelBind(kind),
            (0x00A, Kind::Indication) => return Err(StunError::UnknownMethod(value)),
            (0x00A, _) => Self::Connect(kind),
            (0x00B, Kind::Indication) => return Err(StunError::UnknownMethod(value)),
            (0x00B, _) => Self::ConnectionBind(kind),
            (0x00C, Kind::Indication) => Self::ConnectionAttempt,
            _ => return Err(StunError::UnknownMethod(value)),
        })
    }
}

impl From<Method> for u16 {
    /// # Unit Test
    ///
    /// ```
    /// use stun::{Kind, Method};
    ///
    /// assert_eq!(u16::from(Method::Binding(Kind::Request)), 0x0001);
    /// assert_eq!(u16::from(Method::Allocate(Kind::Error)), 0x0113);
    /// assert_eq!(u16::from(Method::SendIndication), 0x0016);
    /// assert_eq!(u16::from(Method::ConnectionAttempt), 0x001C);
    /// ```
    fn from(method: Method) -> Self {
        let (base, kind) = match method {
            Method::Binding(kind) => (0x001, kind),
            Method::Allocate(kind) => (0x003, kind),
            Method::Refresh(kind) => (0x004, kind),
            Method::SendIndication => (0x006, Kind::Indication),
            Method::DataIndication => (0x007, Kind::Indication),
            Method::CreatePermission(kind) => (0x008, kind),
            Method::ChannelBind(kind) => (0x009, kind),
            Method::Connect(kind) => (0x00A, kind),
            Method::ConnectionBind(kind) => (0x00B, kind),
            Method::ConnectionAttempt => (0x00C, Kind::Indication),
        };

        base | kind as u16
    }
}

//! Cross-boundary messaging between the viewer controller and the
//! rendering surface.

use pv_core::ViewerError;
use pv_core::ViewerResult;
use std::sync::mpsc;
use std::time::Duration;

// Payload messages carry rewritten documents and data URLs; the default
// cap sits above the 9 MB binary size gate after base64 expansion.
const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
const HARD_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;
const FRAME_PREFIX_BYTES: usize = 4;

const MESSAGE_TAG_PAYLOAD: u8 = 1;
const MESSAGE_TAG_SPINNER: u8 = 2;
const MESSAGE_TAG_NAVIGATE: u8 = 3;

/// Endpoint roles on either side of the trust boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Controller,
    Surface,
}

impl EndpointRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Surface => "surface",
        }
    }
}

/// Kind discriminator for payloads delivered to the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Empty,
    Href,
    Document,
    Styles,
    Resource,
    Img,
    Audio,
    Video,
}

impl PayloadKind {
    /// Wire name as the surface sees it; `Empty` is the empty string.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::Href => "href",
            Self::Document => "document",
            Self::Styles => "styles",
            Self::Resource => "resource",
            Self::Img => "img",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    pub fn from_wire_name(value: &str) -> Option<Self> {
        match value {
            "" => Some(Self::Empty),
            "href" => Some(Self::Href),
            "document" => Some(Self::Document),
            "styles" => Some(Self::Styles),
            "resource" => Some(Self::Resource),
            "img" => Some(Self::Img),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Href => 1,
            Self::Document => 2,
            Self::Styles => 3,
            Self::Resource => 4,
            Self::Img => 5,
            Self::Audio => 6,
            Self::Video => 7,
        }
    }

    fn from_code(raw: u8) -> ViewerResult<Self> {
        match raw {
            0 => Ok(Self::Empty),
            1 => Ok(Self::Href),
            2 => Ok(Self::Document),
            3 => Ok(Self::Styles),
            4 => Ok(Self::Resource),
            5 => Ok(Self::Img),
            6 => Ok(Self::Audio),
            7 => Ok(Self::Video),
            _ => Err(ViewerError::new(
                "ipc.payload_kind_invalid",
                format!("invalid payload kind code `{raw}`"),
            )),
        }
    }
}

/// Typed payload delivered controller → surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfacePayload {
    pub proxy_url: String,
    pub data_type: PayloadKind,
    pub data_val: String,
}

/// Loading-indicator switch carried by a spinner control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinnerSwitch {
    On,
    Off,
}

/// Message delivered surface → controller; exactly one shape each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Spinner(SpinnerSwitch),
    Navigate {
        link_url: String,
        explicit_type: Option<String>,
    },
}

/// Envelope over both directions of the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcMessage {
    Payload(SurfacePayload),
    Control(ControlMessage),
}

/// Defines how the two sides communicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub role: EndpointRole,
    pub max_message_bytes: usize,
}

impl ChannelConfig {
    pub fn hardened(role: EndpointRole) -> ViewerResult<Self> {
        let config = Self {
            role,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ViewerResult<()> {
        if self.max_message_bytes == 0 {
            return Err(ViewerError::new(
                "ipc.max_message_bytes_invalid",
                "channel max_message_bytes must be greater than zero",
            ));
        }

        if self.max_message_bytes > HARD_MAX_MESSAGE_BYTES {
            return Err(ViewerError::new(
                "ipc.max_message_bytes_too_large",
                "channel max_message_bytes exceeds hard limit (64 MiB)",
            ));
        }

        Ok(())
    }
}

/// In-memory endpoint that applies framing and message-size checks.
pub struct LocalIpcEndpoint {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    config: ChannelConfig,
}

impl LocalIpcEndpoint {
    pub fn role(&self) -> EndpointRole {
        self.config.role
    }

    pub fn send(&self, message: &IpcMessage) -> ViewerResult<()> {
        let frame = encode_message(message, self.config.max_message_bytes)?;
        self.tx.send(frame).map_err(|error| {
            ViewerError::new(
                "ipc.send_failed",
                format!(
                    "failed to send message from {} endpoint: {error}",
                    self.config.role.as_str()
                ),
            )
        })
    }

    /// Non-blocking receive; `Ok(None)` when no message is pending.
    pub fn try_recv(&self) -> ViewerResult<Option<IpcMessage>> {
        match self.rx.try_recv() {
            Ok(frame) => decode_message(&frame, self.config.max_message_bytes).map(Some),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(ViewerError::new(
                "ipc.peer_disconnected",
                format!(
                    "peer endpoint for {} has disconnected",
                    self.config.role.as_str()
                ),
            )),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> ViewerResult<IpcMessage> {
        let frame = self.rx.recv_timeout(timeout).map_err(|error| {
            ViewerError::new(
                "ipc.recv_failed",
                format!(
                    "failed to receive message for {} endpoint: {error}",
                    self.config.role.as_str()
                ),
            )
        })?;
        decode_message(&frame, self.config.max_message_bytes)
    }
}

/// Creates paired in-memory endpoints for the two boundary roles.
pub fn local_channel_pair(
    left: ChannelConfig,
    right: ChannelConfig,
) -> ViewerResult<(LocalIpcEndpoint, LocalIpcEndpoint)> {
    left.validate()?;
    right.validate()?;

    let (left_to_right_tx, left_to_right_rx) = mpsc::channel();
    let (right_to_left_tx, right_to_left_rx) = mpsc::channel();

    Ok((
        LocalIpcEndpoint {
            tx: left_to_right_tx,
            rx: right_to_left_rx,
            config: left,
        },
        LocalIpcEndpoint {
            tx: right_to_left_tx,
            rx: left_to_right_rx,
            config: right,
        },
    ))
}

/// Encodes a payload as a length-prefixed frame.
pub fn encode_frame(payload: &[u8], max_message_bytes: usize) -> ViewerResult<Vec<u8>> {
    if payload.len() > max_message_bytes {
        return Err(ViewerError::new(
            "ipc.message_too_large",
            format!(
                "payload exceeds max_message_bytes ({} > {})",
                payload.len(),
                max_message_bytes
            ),
        ));
    }

    let len_u32 = u32::try_from(payload.len()).map_err(|_| {
        ViewerError::new(
            "ipc.message_too_large",
            "payload length does not fit in 32-bit frame prefix",
        )
    })?;

    let mut out = Vec::with_capacity(FRAME_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&len_u32.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes a length-prefixed frame and validates payload size.
pub fn decode_frame(frame: &[u8], max_message_bytes: usize) -> ViewerResult<Vec<u8>> {
    if frame.len() < FRAME_PREFIX_BYTES {
        return Err(ViewerError::new(
            "ipc.frame_too_short",
            "frame is shorter than the 4-byte length prefix",
        ));
    }

    let mut len_bytes = [0_u8; FRAME_PREFIX_BYTES];
    len_bytes.copy_from_slice(&frame[..FRAME_PREFIX_BYTES]);
    let payload_len = u32::from_be_bytes(len_bytes) as usize;
    if payload_len > max_message_bytes {
        return Err(ViewerError::new(
            "ipc.message_too_large",
            format!(
                "decoded payload exceeds max_message_bytes ({} > {})",
                payload_len, max_message_bytes
            ),
        ));
    }

    let expected = FRAME_PREFIX_BYTES + payload_len;
    if frame.len() != expected {
        return Err(ViewerError::new(
            "ipc.frame_length_mismatch",
            format!(
                "frame length mismatch: expected {expected} bytes, got {}",
                frame.len()
            ),
        ));
    }

    Ok(frame[FRAME_PREFIX_BYTES..].to_vec())
}

/// Encodes a typed message as a framed payload.
pub fn encode_message(message: &IpcMessage, max_message_bytes: usize) -> ViewerResult<Vec<u8>> {
    let payload = encode_message_payload(message);
    encode_frame(&payload, max_message_bytes)
}

/// Decodes a framed typed message.
pub fn decode_message(frame: &[u8], max_message_bytes: usize) -> ViewerResult<IpcMessage> {
    let payload = decode_frame(frame, max_message_bytes)?;
    decode_message_payload(&payload)
}

fn encode_message_payload(message: &IpcMessage) -> Vec<u8> {
    match message {
        IpcMessage::Payload(payload) => {
            let mut out =
                Vec::with_capacity(2 + 8 + payload.proxy_url.len() + payload.data_val.len());
            out.push(MESSAGE_TAG_PAYLOAD);
            out.push(payload.data_type.code());
            push_string_u32(&mut out, &payload.proxy_url);
            push_string_u32(&mut out, &payload.data_val);
            out
        }
        IpcMessage::Control(ControlMessage::Spinner(switch)) => {
            vec![
                MESSAGE_TAG_SPINNER,
                match switch {
                    SpinnerSwitch::On => 1,
                    SpinnerSwitch::Off => 0,
                },
            ]
        }
        IpcMessage::Control(ControlMessage::Navigate {
            link_url,
            explicit_type,
        }) => {
            let mut out = Vec::with_capacity(2 + 8 + link_url.len());
            out.push(MESSAGE_TAG_NAVIGATE);
            push_string_u32(&mut out, link_url);
            match explicit_type {
                Some(explicit) => {
                    out.push(1);
                    push_string_u32(&mut out, explicit);
                }
                None => out.push(0),
            }
            out
        }
    }
}

fn decode_message_payload(payload: &[u8]) -> ViewerResult<IpcMessage> {
    if payload.is_empty() {
        return Err(ViewerError::new(
            "ipc.message_empty",
            "typed message payload is empty",
        ));
    }

    let mut offset = 0_usize;
    let tag = read_u8(payload, &mut offset, "tag")?;
    let message = match tag {
        MESSAGE_TAG_PAYLOAD => {
            let data_type = PayloadKind::from_code(read_u8(payload, &mut offset, "data_type")?)?;
            let proxy_url = read_string_u32(payload, &mut offset, "proxy_url")?;
            let data_val = read_string_u32(payload, &mut offset, "data_val")?;
            IpcMessage::Payload(SurfacePayload {
                proxy_url,
                data_type,
                data_val,
            })
        }
        MESSAGE_TAG_SPINNER => {
            let switch = match read_u8(payload, &mut offset, "spinner")? {
                0 => SpinnerSwitch::Off,
                1 => SpinnerSwitch::On,
                other => {
                    return Err(ViewerError::new(
                        "ipc.message_field_invalid",
                        format!("invalid spinner flag `{other}`; expected 0 or 1"),
                    ));
                }
            };
            IpcMessage::Control(ControlMessage::Spinner(switch))
        }
        MESSAGE_TAG_NAVIGATE => {
            let link_url = read_string_u32(payload, &mut offset, "link_url")?;
            let explicit_type = match read_u8(payload, &mut offset, "explicit_type_flag")? {
                0 => None,
                1 => Some(read_string_u32(payload, &mut offset, "explicit_type")?),
                other => {
                    return Err(ViewerError::new(
                        "ipc.message_field_invalid",
                        format!("invalid explicit-type flag `{other}`; expected 0 or 1"),
                    ));
                }
            };
            IpcMessage::Control(ControlMessage::Navigate {
                link_url,
                explicit_type,
            })
        }
        other => {
            return Err(ViewerError::new(
                "ipc.message_tag_unknown",
                format!("unknown typed message tag `{other}`"),
            ));
        }
    };

    if offset != payload.len() {
        return Err(ViewerError::new(
            "ipc.message_trailing_bytes",
            format!(
                "typed message payload has trailing bytes (decoded {offset} of {})",
                payload.len()
            ),
        ));
    }

    Ok(message)
}

fn push_string_u32(out: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    // Frame-level size checks bound the total; a single field can use
    // the full u32 range.
    let len = bytes.len() as u32;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
}

fn read_u8(payload: &[u8], offset: &mut usize, field: &str) -> ViewerResult<u8> {
    if *offset >= payload.len() {
        return Err(ViewerError::new(
            "ipc.message_truncated",
            format!("missing `{field}` in typed message payload"),
        ));
    }

    let value = payload[*offset];
    *offset += 1;
    Ok(value)
}

fn read_u32(payload: &[u8], offset: &mut usize, field: &str) -> ViewerResult<u32> {
    let bytes = read_exact(payload, offset, 4, field)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_string_u32(payload: &[u8], offset: &mut usize, field: &str) -> ViewerResult<String> {
    let len = read_u32(payload, offset, field)? as usize;
    let bytes = read_exact(payload, offset, len, field)?;
    String::from_utf8(bytes.to_vec()).map_err(|error| {
        ViewerError::new(
            "ipc.message_utf8_invalid",
            format!("typed message field `{field}` is not valid UTF-8: {error}"),
        )
    })
}

fn read_exact<'a>(
    payload: &'a [u8],
    offset: &mut usize,
    len: usize,
    field: &str,
) -> ViewerResult<&'a [u8]> {
    let end = offset.saturating_add(len);
    if end > payload.len() {
        return Err(ViewerError::new(
            "ipc.message_truncated",
            format!("typed message payload ended while reading `{field}` (need {len} bytes)"),
        ));
    }

    let out = &payload[*offset..end];
    *offset = end;
    Ok(out)
}

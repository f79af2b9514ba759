//! QMUX/QMI message framing, construction, and parsing. See `spec.md`
//! §3 and §4.1 for the wire layout this module implements byte-for-byte;
//! the exact field widths are grounded in libqmi's `struct qmux` /
//! `struct control_header` / `struct service_header` /
//! `struct tlv` (`examples/original_source/src/qmimsg.c`).

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::tlv::{Endian, StringPrefix, TlvReader};

/// One-byte QMUX frame marker.
pub const MARKER: u8 = 0x01;

/// `struct qmux` size in bytes: `length: u16, flags: u8, service: u8,
/// client: u8`. The length field itself is counted, per libqmi's
/// `qmux_length(m) != m->len - 1` invariant.
pub(crate) const QMUX_HEADER_LEN: usize = 5;

/// `struct control_header` size: `flags: u8, transaction: u8,
/// message: u16, tlv_length: u16`.
const CTL_QMI_HEADER_LEN: usize = 6;

/// `struct service_header` size: `flags: u8, transaction: u16,
/// message: u16, tlv_length: u16`.
const SVC_QMI_HEADER_LEN: usize = 7;

/// QMI-level flag bit marking a message as a response to a request.
pub const QMI_FLAG_RESPONSE: u8 = 0x02;
/// QMI-level flag bit marking a message as an unsolicited indication.
pub const QMI_FLAG_INDICATION: u8 = 0x04;
/// QMUX-level flag bit set on every message the modem sends to the host
/// (as opposed to host-to-modem messages, which leave this bit clear).
pub const QMUX_FLAG_TO_HOST: u8 = 0x80;

/// TLV type of the mandatory result TLV on every response.
pub const RESULT_TLV_TYPE: u8 = 0x02;

/// One QMUX-framed QMI message. Backed by a single contiguous buffer so
/// the raw and logical views never drift apart; TLVs are read as slice
/// views into that buffer and written by append-only growth.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    buf: BytesMut,
    /// Vendor-specific disambiguator for message ids that are reused
    /// across vendors. Carried alongside the message as metadata only;
    /// it never appears on the wire (spec §4.1 edge cases).
    vendor_context: Option<u16>,
}

impl Message {
    fn is_ctl(&self) -> bool {
        self.buf[4] == 0
    }

    fn qmi_header_len(&self) -> usize {
        if self.is_ctl() {
            CTL_QMI_HEADER_LEN
        } else {
            SVC_QMI_HEADER_LEN
        }
    }

    fn tlv_start(&self) -> usize {
        1 + QMUX_HEADER_LEN + self.qmi_header_len()
    }

    fn tlv_len_offset(&self) -> usize {
        self.tlv_start() - 2
    }

    fn message_id_offset(&self) -> usize {
        if self.is_ctl() {
            8
        } else {
            9
        }
    }

    pub fn service(&self) -> u8 {
        self.buf[4]
    }

    pub fn client(&self) -> u8 {
        self.buf[5]
    }

    pub fn qmux_flags(&self) -> u8 {
        self.buf[3]
    }

    pub fn qmi_flags(&self) -> u8 {
        self.buf[6]
    }

    pub fn is_response(&self) -> bool {
        self.qmi_flags() & QMI_FLAG_RESPONSE != 0
    }

    pub fn is_indication(&self) -> bool {
        self.qmi_flags() & QMI_FLAG_INDICATION != 0
    }

    pub fn transaction_id(&self) -> u16 {
        if self.is_ctl() {
            self.buf[7] as u16
        } else {
            u16::from_le_bytes([self.buf[7], self.buf[8]])
        }
    }

    pub fn message_id(&self) -> u16 {
        let off = self.message_id_offset();
        u16::from_le_bytes([self.buf[off], self.buf[off + 1]])
    }

    pub fn qmux_length(&self) -> u16 {
        u16::from_le_bytes([self.buf[1], self.buf[2]])
    }

    pub fn tlv_total_length(&self) -> u16 {
        let off = self.tlv_len_offset();
        u16::from_le_bytes([self.buf[off], self.buf[off + 1]])
    }

    pub fn tlv_area(&self) -> &[u8] {
        let start = self.tlv_start();
        let len = self.tlv_total_length() as usize;
        &self.buf[start..start + len]
    }

    pub fn vendor_context(&self) -> Option<u16> {
        self.vendor_context
    }

    pub fn set_vendor_context(&mut self, ctx: Option<u16>) {
        self.vendor_context = ctx;
    }

    fn set_qmux_length(&mut self, v: u16) {
        self.buf[1..3].copy_from_slice(&v.to_le_bytes());
    }

    fn set_tlv_total_length(&mut self, v: u16) {
        let off = self.tlv_len_offset();
        self.buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    /// Rewrites only the transaction field in place, without moving any
    /// TLVs. The width (8 vs 16 bit) is taken from the service already in
    /// the header, per spec §4.1.
    pub fn set_transaction_id(&mut self, new_id: u16) -> Result<()> {
        if self.is_ctl() {
            if new_id > u8::MAX as u16 {
                return Err(Error::InvalidArgument(format!(
                    "transaction id {new_id} does not fit in 8 bits for the CTL service"
                )));
            }
            self.buf[7] = new_id as u8;
        } else {
            self.buf[7..9].copy_from_slice(&new_id.to_le_bytes());
        }
        Ok(())
    }

    /// Allocates an empty message with correct headers and a zero-length
    /// TLV area. Fails only if `transaction` cannot fit the width CTL
    /// mandates (8 bit).
    pub fn new_request(
        service: u8,
        client: u8,
        qmux_flags: u8,
        qmi_flags: u8,
        transaction: u16,
        message_id: u16,
    ) -> Result<Message> {
        let is_ctl = service == 0;
        if is_ctl && transaction > u8::MAX as u16 {
            return Err(Error::InvalidArgument(format!(
                "transaction id {transaction} does not fit in 8 bits for the CTL service"
            )));
        }
        let qmi_header_len = if is_ctl {
            CTL_QMI_HEADER_LEN
        } else {
            SVC_QMI_HEADER_LEN
        };
        let qmux_length = (QMUX_HEADER_LEN + qmi_header_len) as u16;

        let mut buf = BytesMut::with_capacity(1 + qmux_length as usize);
        buf.put_u8(MARKER);
        buf.put_u16_le(qmux_length);
        buf.put_u8(qmux_flags);
        buf.put_u8(service);
        buf.put_u8(client);
        buf.put_u8(qmi_flags);
        if is_ctl {
            buf.put_u8(transaction as u8);
        } else {
            buf.put_u16_le(transaction);
        }
        buf.put_u16_le(message_id);
        buf.put_u16_le(0u16); // tlv_total_length

        Ok(Message { buf, vendor_context: None })
    }

    /// Builds a response to `request`, reusing its service/client/
    /// transaction, setting the response bit, and inserting the
    /// mandatory result TLV (type 0x02, success/failure + protocol error
    /// code). `protocol_error` of 0 means success.
    pub fn response_for(request: &Message, protocol_error: u16) -> Message {
        let mut response = Message::new_request(
            request.service(),
            request.client(),
            QMUX_FLAG_TO_HOST,
            request.qmi_flags() | QMI_FLAG_RESPONSE,
            request.transaction_id(),
            request.message_id(),
        )
        .expect("a request's own header widths are already valid for a response");

        let status: u16 = if protocol_error == 0 { 0 } else { 1 };
        let mut value = [0u8; 4];
        value[0..2].copy_from_slice(&status.to_le_bytes());
        value[2..4].copy_from_slice(&protocol_error.to_le_bytes());
        response
            .write_bytes(RESULT_TLV_TYPE, &value)
            .expect("a single fresh 4-byte TLV never overflows a new message");
        response
    }

    /// Parses and validates one complete QMUX frame. `bytes` must be
    /// exactly one frame (no trailing or leading bytes); use
    /// [`FrameDecoder`] to pull frames out of an accumulating stream.
    pub fn from_raw(bytes: &[u8]) -> Result<Message> {
        if bytes.len() < 1 + QMUX_HEADER_LEN {
            return Err(Error::Truncated);
        }
        if bytes[0] != MARKER {
            return Err(Error::Framing);
        }
        let qmux_length = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        if qmux_length < QMUX_HEADER_LEN {
            return Err(Error::Framing);
        }
        if bytes.len() < 1 + qmux_length {
            return Err(Error::Truncated);
        }
        if bytes.len() != 1 + qmux_length {
            // Trailing garbage past the declared frame is a framing
            // violation for this single-frame parse; callers streaming
            // concatenated buffers must use `FrameDecoder` instead.
            return Err(Error::Framing);
        }

        let service = bytes[4];
        let is_ctl = service == 0;
        let qmi_header_len = if is_ctl { CTL_QMI_HEADER_LEN } else { SVC_QMI_HEADER_LEN };
        let header_len = QMUX_HEADER_LEN + qmi_header_len;
        if qmux_length < header_len {
            return Err(Error::Framing);
        }

        let tlv_start = 1 + header_len;
        let tlv_len_off = tlv_start - 2;
        let declared_tlv_len = u16::from_le_bytes([bytes[tlv_len_off], bytes[tlv_len_off + 1]]) as usize;
        if qmux_length - header_len != declared_tlv_len {
            return Err(Error::Framing);
        }
        if tlv_start + declared_tlv_len != bytes.len() {
            return Err(Error::Truncated);
        }

        let tlv_area = &bytes[tlv_start..tlv_start + declared_tlv_len];
        let mut off = 0usize;
        while off < tlv_area.len() {
            if off + 3 > tlv_area.len() {
                return Err(Error::TlvOverflow);
            }
            let len = u16::from_le_bytes([tlv_area[off + 1], tlv_area[off + 2]]) as usize;
            let record_len = 3 + len;
            if off + record_len > tlv_area.len() {
                return Err(Error::TlvOverflow);
            }
            off += record_len;
        }

        Ok(Message { buf: BytesMut::from(bytes), vendor_context: None })
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the first TLV of the given type, or `None` if absent.
    /// Duplicate TLV types are ignored; only the first occurrence is
    /// ever visible.
    pub fn tlv_find(&self, type_: u8) -> Option<&[u8]> {
        let area = self.tlv_area();
        let mut off = 0usize;
        while off + 3 <= area.len() {
            let t = area[off];
            let len = u16::from_le_bytes([area[off + 1], area[off + 2]]) as usize;
            let val_start = off + 3;
            let val_end = val_start + len;
            if val_end > area.len() {
                break;
            }
            if t == type_ {
                return Some(&area[val_start..val_end]);
            }
            off = val_end;
        }
        None
    }

    pub fn tlv_reader(&self, type_: u8) -> Result<TlvReader<'_>> {
        self.tlv_find(type_).map(TlvReader::new).ok_or(Error::TlvNotFound(type_))
    }

    /// Parses the mandatory result TLV. `Ok(())` on success,
    /// `Err(Error::ProtocolError(code))` on a reported failure, and
    /// `Err(Error::MalformedResponse)` if the TLV is absent or the wrong
    /// size (spec §9 Open Question #1).
    pub fn parse_result(&self) -> Result<()> {
        let value = self.tlv_find(RESULT_TLV_TYPE).ok_or(Error::MalformedResponse)?;
        if value.len() != 4 {
            return Err(Error::MalformedResponse);
        }
        let status = u16::from_le_bytes([value[0], value[1]]);
        let code = u16::from_le_bytes([value[2], value[3]]);
        if status == 0 {
            Ok(())
        } else {
            Err(Error::ProtocolError(code))
        }
    }

    fn tlv_append_raw(&mut self, type_: u8, value: &[u8]) -> Result<()> {
        if value.len() > u16::MAX as usize {
            return Err(Error::TlvTooLong);
        }
        let add_len = 3 + value.len();
        let new_total = self.buf.len() + add_len;
        if new_total > 0xFFFF || new_total < 1 {
            return Err(Error::TlvTooLong);
        }

        self.buf.put_u8(type_);
        self.buf.put_u16_le(value.len() as u16);
        self.buf.extend_from_slice(value);

        let new_tlv_len = self.tlv_total_length() as usize + add_len;
        self.set_tlv_total_length(new_tlv_len as u16);
        let new_qmux_len = self.qmux_length() as usize + add_len;
        self.set_qmux_length(new_qmux_len as u16);
        Ok(())
    }

    pub fn write_u8(&mut self, type_: u8, v: u8) -> Result<()> {
        self.tlv_append_raw(type_, &[v])
    }

    pub fn write_i8(&mut self, type_: u8, v: i8) -> Result<()> {
        self.write_u8(type_, v as u8)
    }

    pub fn write_u16(&mut self, type_: u8, v: u16, endian: Endian) -> Result<()> {
        let bytes = match endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        };
        self.tlv_append_raw(type_, &bytes)
    }

    pub fn write_i16(&mut self, type_: u8, v: i16, endian: Endian) -> Result<()> {
        self.write_u16(type_, v as u16, endian)
    }

    pub fn write_u32(&mut self, type_: u8, v: u32, endian: Endian) -> Result<()> {
        let bytes = match endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        };
        self.tlv_append_raw(type_, &bytes)
    }

    pub fn write_i32(&mut self, type_: u8, v: i32, endian: Endian) -> Result<()> {
        self.write_u32(type_, v as u32, endian)
    }

    pub fn write_u64(&mut self, type_: u8, v: u64, endian: Endian) -> Result<()> {
        let bytes = match endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        };
        self.tlv_append_raw(type_, &bytes)
    }

    pub fn write_i64(&mut self, type_: u8, v: i64, endian: Endian) -> Result<()> {
        self.write_u64(type_, v as u64, endian)
    }

    pub fn write_sized_uint(&mut self, type_: u8, n_bytes: u8, v: u64, endian: Endian) -> Result<()> {
        if !(1..=8).contains(&n_bytes) {
            return Err(Error::InvalidArgument(format!(
                "sized_uint width {n_bytes} out of range 1..=8"
            )));
        }
        let full = match endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        };
        let slice = match endian {
            Endian::Little => &full[..n_bytes as usize],
            Endian::Big => &full[8 - n_bytes as usize..],
        };
        self.tlv_append_raw(type_, slice)
    }

    pub fn write_string(&mut self, type_: u8, value: &str, prefix: StringPrefix) -> Result<()> {
        match prefix {
            StringPrefix::None => self.tlv_append_raw(type_, value.as_bytes()),
            StringPrefix::U8 => {
                if value.len() > u8::MAX as usize {
                    return Err(Error::TlvTooLong);
                }
                let mut buf = Vec::with_capacity(1 + value.len());
                buf.push(value.len() as u8);
                buf.extend_from_slice(value.as_bytes());
                self.tlv_append_raw(type_, &buf)
            }
            StringPrefix::U16 => {
                if value.len() > u16::MAX as usize {
                    return Err(Error::TlvTooLong);
                }
                let mut buf = Vec::with_capacity(2 + value.len());
                buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
                buf.extend_from_slice(value.as_bytes());
                self.tlv_append_raw(type_, &buf)
            }
        }
    }

    pub fn write_bytes(&mut self, type_: u8, value: &[u8]) -> Result<()> {
        self.tlv_append_raw(type_, value)
    }

    /// Begins a staged, composite TLV. Nothing touches the message
    /// buffer until [`TlvBuilder::commit`] is called; dropping the
    /// builder (or calling [`TlvBuilder::reset`]) discards it with the
    /// message completely unchanged.
    pub fn begin_tlv(&mut self, type_: u8) -> TlvBuilder<'_> {
        TlvBuilder { message: self, type_, scratch: Vec::new() }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Message");
        s.field("service", &self.service())
            .field("client", &self.client())
            .field("transaction_id", &self.transaction_id())
            .field("message_id", &format_args!("{:#06x}", self.message_id()))
            .field("qmi_flags", &format_args!("{:#04x}", self.qmi_flags()));
        // Full TLV byte dumps are only worth the noise at trace level,
        // mirroring libqmi's separate `qmimsg_print` debug path.
        if log::log_enabled!(log::Level::Trace) {
            s.field("tlv_area", &self.tlv_area());
        }
        s.finish()
    }
}

/// A staged composite TLV under construction. See [`Message::begin_tlv`].
pub struct TlvBuilder<'a> {
    message: &'a mut Message,
    type_: u8,
    scratch: Vec<u8>,
}

impl<'a> TlvBuilder<'a> {
    pub fn write_u8(mut self, v: u8) -> Self {
        self.scratch.push(v);
        self
    }

    pub fn write_u16(mut self, v: u16, endian: Endian) -> Self {
        match endian {
            Endian::Little => self.scratch.extend_from_slice(&v.to_le_bytes()),
            Endian::Big => self.scratch.extend_from_slice(&v.to_be_bytes()),
        }
        self
    }

    pub fn write_u32(mut self, v: u32, endian: Endian) -> Self {
        match endian {
            Endian::Little => self.scratch.extend_from_slice(&v.to_le_bytes()),
            Endian::Big => self.scratch.extend_from_slice(&v.to_be_bytes()),
        }
        self
    }

    pub fn write_bytes(mut self, v: &[u8]) -> Self {
        self.scratch.extend_from_slice(v);
        self
    }

    /// Commits the staged bytes as a single TLV on the underlying
    /// message.
    pub fn commit(self) -> Result<()> {
        self.message.tlv_append_raw(self.type_, &self.scratch)
    }

    /// Discards the staged TLV; the message is left byte-identical to
    /// its state before `begin_tlv` was called.
    pub fn reset(self) {}
}

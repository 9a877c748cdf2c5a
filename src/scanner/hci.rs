//! Raw HCI socket backend.
//!
//! Opens a raw Linux HCI socket, enables a passive LE scan and parses LE
//! Advertising Report events itself, without the BlueZ daemon. Requires
//! CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{Advertisement, uuid_from_u16};
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::SystemTime;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use uuid::Uuid;

const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;
const HCI_DEV: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Passive scan, 10 ms interval and window (0.625 ms units), public own
// address, accept all advertisers.
const SCAN_PARAMETERS: [u8; 7] = [0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00];
// Enable, keep duplicates: every advertisement refreshes liveness.
const SCAN_ENABLE: [u8; 2] = [0x01, 0x00];

const AD_INCOMPLETE_UUID16: u8 = 0x02;
const AD_COMPLETE_UUID16: u8 = 0x03;
const AD_INCOMPLETE_UUID128: u8 = 0x06;
const AD_COMPLETE_UUID128: u8 = 0x07;
const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;
const AD_MANUFACTURER_DATA: u8 = 0xFF;

/// Max HCI event size: 3 header bytes plus 255 parameter bytes.
const EVENT_BUFFER_LEN: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
#[derive(Default)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    /// Filter passing only LE meta events.
    fn le_meta_events() -> Self {
        let mut filter = Self::default();
        filter.type_mask |= 1 << u32::from(HCI_EVENT_PKT);
        let bit = usize::from(EVT_LE_META_EVENT);
        filter.event_mask[bit / 32] |= 1 << (bit % 32);
        filter
    }
}

fn os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// A raw HCI socket bound to one controller.
struct HciSocket(OwnedFd);

impl HciSocket {
    fn open(dev_id: u16) -> Result<Self, ScanError> {
        // SAFETY: plain socket(2) call; the returned descriptor is checked
        // before taking ownership.
        let fd = unsafe { libc::socket(AF_BLUETOOTH, SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK, BTPROTO_HCI) };
        if fd < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        // SAFETY: fd is a freshly created, valid descriptor owned by nobody else.
        let socket = Self(unsafe { OwnedFd::from_raw_fd(fd) });

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        // SAFETY: addr outlives the call and the length matches its type.
        let ret = unsafe {
            libc::bind(
                socket.0.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to bind HCI socket"));
        }
        Ok(socket)
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        // SAFETY: filter outlives the call and the length matches its type.
        let ret = unsafe {
            libc::setsockopt(
                self.0.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }
        Ok(())
    }

    fn send_command(&self, ogf: u16, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
        let packet = command_packet(ogf, ocf, params);
        // SAFETY: the pointer and length describe the live `packet` buffer.
        let ret = unsafe { libc::write(self.0.as_raw_fd(), packet.as_ptr() as *const c_void, packet.len()) };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }
        Ok(())
    }
}

fn command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Fold the AD structures of one report into `adv`.
///
/// Parsing stops at the first truncated structure; whatever was read
/// before it is kept.
fn parse_ad_structures(adv: &mut Advertisement, mut data: &[u8]) {
    while let [len, rest @ ..] = data {
        let len = usize::from(*len);
        if len == 0 || len > rest.len() {
            break;
        }
        let (ad_type, payload) = (rest[0], &rest[1..len]);
        data = &rest[len..];

        match ad_type {
            AD_INCOMPLETE_UUID16 | AD_COMPLETE_UUID16 => adv.service_uuids.extend(
                payload
                    .chunks_exact(2)
                    .map(|c| uuid_from_u16(u16::from_le_bytes([c[0], c[1]]))),
            ),
            AD_INCOMPLETE_UUID128 | AD_COMPLETE_UUID128 => {
                // 128-bit UUIDs travel fully byte-reversed on the air
                adv.service_uuids.extend(payload.chunks_exact(16).map(|c| {
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(c);
                    bytes.reverse();
                    Uuid::from_bytes(bytes)
                }))
            }
            AD_SHORT_NAME | AD_COMPLETE_NAME => {
                // A complete name wins over a shortened one.
                if adv.name.is_none() || ad_type == AD_COMPLETE_NAME {
                    adv.name = Some(String::from_utf8_lossy(payload).into_owned());
                }
            }
            AD_MANUFACTURER_DATA if payload.len() >= 2 => {
                let company_id = u16::from_le_bytes([payload[0], payload[1]]);
                adv.manufacturer_data.insert(company_id, payload[2..].to_vec());
            }
            _ => {}
        }
    }
}

/// Parse every report of an LE Advertising Report event.
///
/// `event` starts at the HCI packet type byte. Malformed trailing reports
/// are dropped.
fn parse_advertising_reports(event: &[u8], timestamp: SystemTime) -> Vec<Advertisement> {
    let [HCI_EVENT_PKT, EVT_LE_META_EVENT, _, EVT_LE_ADVERTISING_REPORT, count, reports_data @ ..] = event else {
        return Vec::new();
    };
    let mut rest = reports_data;

    let mut reports = Vec::with_capacity(usize::from(*count));
    for _ in 0..*count {
        // event type, address type, address, data length
        let [_, _, a0, a1, a2, a3, a4, a5, data_len, tail @ ..] = rest else {
            break;
        };
        let data_len = usize::from(*data_len);
        // data followed by one RSSI byte
        if tail.len() < data_len + 1 {
            break;
        }

        let address = MacAddress::from_le_bytes([*a0, *a1, *a2, *a3, *a4, *a5]);
        let mut adv = Advertisement::new(address, timestamp);
        parse_ad_structures(&mut adv, &tail[..data_len]);
        reports.push(adv);

        rest = &tail[data_len + 1..];
    }
    reports
}

/// Start a passive LE scan on `hci0` and stream every advertisement.
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let events = HciSocket::open(HCI_DEV)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    // Commands go through their own socket so replies never interleave
    // with the advertising events read below.
    let commands = HciSocket::open(HCI_DEV)?;
    commands.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &SCAN_PARAMETERS)?;
    commands.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &SCAN_ENABLE)?;

    let async_fd = AsyncFd::new(events.0)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;
    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let _commands = commands;
        let mut buf = [0u8; EVENT_BUFFER_LEN];

        'outer: loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(err) => {
                    tracing::warn!(error = %err, "HCI socket closed");
                    break;
                }
            };

            // Drain all available packets before waiting again
            loop {
                let read = guard.try_io(|inner| {
                    // SAFETY: buf is a live, writable buffer of buf.len() bytes.
                    let ret = unsafe { libc::read(inner.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len()) };
                    if ret < 0 { Err(io::Error::last_os_error()) } else { Ok(ret as usize) }
                });
                let n = match read {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) | Ok(Err(_)) | Err(_) => break,
                };

                for adv in parse_advertising_reports(&buf[..n], SystemTime::now()) {
                    if tx.send(adv).await.is_err() {
                        break 'outer;
                    }
                }
            }
        }
    });

    Ok(rx)
}

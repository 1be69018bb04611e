//! Passive BLE scanning on a raw HCI socket.
//!
//! Talks to the kernel directly, without the BlueZ daemon. Requires
//! CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges.

use super::{Forwarded, Source, SourceError, SourceHandle, forward};
use crate::decoder::{self, MANUFACTURER_DATA_TYPE, RUUVI_COMPANY_ID};
use crate::mac_address::MacAddress;
use crate::measurement::Measurement;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::SystemTime;
use tokio::io::unix::AsyncFd;
use tokio::sync::{mpsc, oneshot};

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// Scan interval and window, in 0.625 ms units (10 ms).
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

/// Largest HCI event: 2 byte header + 255 byte parameters + packet type.
const MAX_EVENT_SIZE: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn le_meta_events() -> Self {
        let mut filter = HciFilter {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        };
        filter.type_mask |= 1 << u32::from(HCI_EVENT_PKT);
        let bit = usize::from(EVT_LE_META_EVENT);
        filter.event_mask[bit / 32] |= 1 << (bit % 32);
        filter
    }
}

fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

fn set_scan_parameters_packet() -> Vec<u8> {
    let mut params = Vec::with_capacity(7);
    params.push(LE_SCAN_PASSIVE);
    params.extend_from_slice(&SCAN_INTERVAL.to_le_bytes());
    params.extend_from_slice(&SCAN_WINDOW.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

fn set_scan_enable_packet(enable: bool) -> Vec<u8> {
    // Duplicate filtering off: every broadcast carries a new reading.
    hci_command_packet(
        OGF_LE_CTL,
        OCF_LE_SET_SCAN_ENABLE,
        &[u8::from(enable), 0x00],
    )
}

fn os_error(context: &str) -> SourceError {
    SourceError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// Open a non-blocking raw HCI socket bound to `device`.
fn open_socket(device: u16) -> Result<OwnedFd, SourceError> {
    // SAFETY: plain socket(2) call; the result is checked before use.
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    if fd < 0 {
        return Err(os_error("Failed to create HCI socket"));
    }
    // SAFETY: `fd` is a freshly created descriptor nobody else owns.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: device,
        hci_channel: HCI_CHANNEL_RAW,
    };
    // SAFETY: `addr` is a valid sockaddr_hci for the duration of the call.
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error(&format!("Failed to bind HCI socket to hci{device}")));
    }

    Ok(fd)
}

fn set_filter(fd: &OwnedFd) -> Result<(), SourceError> {
    let filter = HciFilter::le_meta_events();
    // SAFETY: `filter` matches the kernel's struct hci_filter layout.
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to set HCI filter"));
    }
    Ok(())
}

fn send_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), SourceError> {
    // SAFETY: `packet` is valid for reads of `packet.len()` bytes.
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to send HCI command"));
    }
    Ok(())
}

/// One entry of an LE advertising report event.
#[derive(Debug, PartialEq)]
struct AdvertisingReport<'a> {
    address: MacAddress,
    data: &'a [u8],
    rssi: i8,
}

/// Split an HCI LE advertising report event into its reports.
///
/// `event` starts with the HCI packet type byte. Truncated reports end the
/// iteration.
fn advertising_reports(event: &[u8]) -> Vec<AdvertisingReport<'_>> {
    let mut reports = Vec::new();
    if event.len() < 5
        || event[0] != HCI_EVENT_PKT
        || event[1] != EVT_LE_META_EVENT
        || event[3] != EVT_LE_ADVERTISING_REPORT
    {
        return reports;
    }

    let count = usize::from(event[4]);
    let mut rest = &event[5..];
    for _ in 0..count {
        // event type, address type, address (6), data length
        if rest.len() < 9 {
            break;
        }
        let mut address = [0u8; 6];
        address.copy_from_slice(&rest[2..8]);
        address.reverse();
        let len = usize::from(rest[8]);
        if rest.len() < 9 + len + 1 {
            break;
        }
        reports.push(AdvertisingReport {
            address: MacAddress(address),
            data: &rest[9..9 + len],
            rssi: rest[9 + len] as i8,
        });
        rest = &rest[9 + len + 1..];
    }
    reports
}

/// Find the Ruuvi manufacturer payload (starting at the format byte) among
/// the AD structures of an advertisement.
fn ruuvi_payload(ad: &[u8]) -> Option<&[u8]> {
    let mut offset = 0;
    while offset + 1 < ad.len() {
        let len = usize::from(ad[offset]);
        if len == 0 || offset + 1 + len > ad.len() {
            return None;
        }
        let element = &ad[offset + 1..offset + 1 + len];
        if element.len() >= 4
            && element[0] == MANUFACTURER_DATA_TYPE
            && u16::from_le_bytes([element[1], element[2]]) == RUUVI_COMPANY_ID
        {
            return Some(&element[3..]);
        }
        offset += 1 + len;
    }
    None
}

/// Scans on a local Bluetooth controller (`hciN`).
#[derive(Debug, Clone)]
pub struct HciScannerSource {
    device: u16,
}

impl HciScannerSource {
    pub fn new(device: u16) -> Self {
        HciScannerSource { device }
    }

    async fn run(
        events: AsyncFd<OwnedFd>,
        commands: OwnedFd,
        tx: mpsc::Sender<Measurement>,
        mut stopped: oneshot::Receiver<()>,
    ) {
        let mut buf = [0u8; MAX_EVENT_SIZE];

        'scan: loop {
            let mut guard = tokio::select! {
                _ = &mut stopped => break,
                readable = events.readable() => match readable {
                    Ok(guard) => guard,
                    Err(error) => {
                        tracing::error!(%error, "HCI socket failed");
                        break;
                    }
                },
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,
                    Ok(Err(error)) => {
                        tracing::error!(%error, "Failed to read HCI event");
                        break;
                    }
                    Err(_would_block) => break,
                };

                let received_at = SystemTime::now();
                for report in advertising_reports(&buf[..n]) {
                    let Some(payload) = ruuvi_payload(report.data) else {
                        continue;
                    };
                    let raw = decoder::encode_hex(&decoder::frame_payload(payload));
                    let forwarded = forward(
                        &tx,
                        &raw,
                        report.address,
                        Some(i16::from(report.rssi)),
                        Some(received_at),
                    )
                    .await;
                    if forwarded == Forwarded::Closed {
                        break 'scan;
                    }
                }
            }
        }

        if let Err(error) = send_command(&commands, &set_scan_enable_packet(false)) {
            tracing::warn!(%error, "Failed to disable LE scan");
        }
    }
}

impl Source for HciScannerSource {
    fn name(&self) -> &'static str {
        "hci_scanner"
    }

    fn start(self: Box<Self>, tx: mpsc::Sender<Measurement>) -> Result<SourceHandle, SourceError> {
        let events = open_socket(self.device)?;
        set_filter(&events)?;

        // Commands go through a second socket so the event filter stays untouched.
        let commands = open_socket(self.device)?;
        send_command(&commands, &set_scan_parameters_packet())?;
        send_command(&commands, &set_scan_enable_packet(true))?;

        let events = AsyncFd::new(events)
            .map_err(|e| SourceError::Bluetooth(format!("Failed to create async fd: {e}")))?;

        tracing::info!(device = self.device, "Starting passive LE scan");
        Ok(SourceHandle::spawn("hci_scanner", move |stopped| {
            Self::run(events, commands, tx, stopped)
        }))
    }
}

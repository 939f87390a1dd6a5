use crate::endpoints::{EndpointDesc, InterfaceDesc};
use crate::protocol::{PID, VID};
use crate::transport::{DeviceHost, DeviceId, Transport};
use crate::{RayNeoError, Result};
use rusb::{DeviceHandle, GlobalContext, TransferType};
use std::time::Duration;

fn device_id(device: &rusb::Device<GlobalContext>) -> DeviceId {
    ((device.bus_number() as u32) << 8) | device.address() as u32
}

fn map_open_err(e: rusb::Error) -> RayNeoError {
    match e {
        // Typically a missing udev rule on Linux.
        rusb::Error::Access => RayNeoError::PermissionDenied,
        other => RayNeoError::OpenFailed(other.to_string()),
    }
}

fn is_rayneo(device: &rusb::Device<GlobalContext>) -> bool {
    device
        .device_descriptor()
        .map(|desc| desc.vendor_id() == VID && desc.product_id() == PID)
        .unwrap_or(false)
}

/// rusb-backed device discovery.
///
/// Desktop platforms have no runtime permission broker; access problems
/// surface as open failures instead, so permission is reported as granted.
pub struct UsbHost;

impl UsbHost {
    pub fn new() -> Self {
        UsbHost
    }
}

impl Default for UsbHost {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceHost for UsbHost {
    fn find_device(&mut self) -> Option<DeviceId> {
        let devices = match rusb::devices() {
            Ok(list) => list,
            Err(e) => {
                log::warn!("USB enumeration failed: {}", e);
                return None;
            }
        };
        devices.iter().find(is_rayneo).map(|d| device_id(&d))
    }

    fn has_permission(&mut self, _device: DeviceId) -> bool {
        true
    }

    fn request_permission(&mut self, _device: DeviceId) {}

    fn open(&mut self, device: DeviceId) -> Result<Box<dyn Transport>> {
        let devices = rusb::devices()?;
        let usb_device = devices
            .iter()
            .find(|d| is_rayneo(d) && device_id(d) == device)
            .ok_or(RayNeoError::DeviceNotFound)?;

        let handle = usb_device.open().map_err(map_open_err)?;

        log::info!(
            "Opened RayNeo at bus {:03} address {:03}",
            usb_device.bus_number(),
            usb_device.address()
        );

        Ok(Box::new(UsbTransport {
            handle,
            claimed: None,
        }))
    }
}

/// rusb transport over the opened device handle.
pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    claimed: Option<u8>,
}

impl UsbTransport {
    fn map_read_err(e: rusb::Error) -> Result<usize> {
        match e {
            // Timeout with no data is a normal idle read.
            rusb::Error::Timeout => Ok(0),
            rusb::Error::NoDevice | rusb::Error::Pipe => Err(RayNeoError::Disconnected),
            other => Err(RayNeoError::Usb(other)),
        }
    }
}

impl Transport for UsbTransport {
    fn interfaces(&mut self) -> Result<Vec<InterfaceDesc>> {
        let config = self.handle.device().active_config_descriptor()?;
        let mut interfaces = Vec::new();
        for interface in config.interfaces() {
            // First alternate setting only; the glasses expose no others.
            let Some(desc) = interface.descriptors().next() else {
                continue;
            };
            interfaces.push(InterfaceDesc {
                number: desc.interface_number(),
                endpoints: desc
                    .endpoint_descriptors()
                    .map(|ep| EndpointDesc {
                        address: ep.address(),
                        direction: ep.direction(),
                        transfer_type: ep.transfer_type(),
                        max_packet_size: ep.max_packet_size(),
                    })
                    .collect(),
            });
        }
        Ok(interfaces)
    }

    fn claim_interface(&mut self, number: u8) -> Result<()> {
        match self.handle.detach_kernel_driver(number) {
            Ok(_) => log::info!("Detached kernel driver from interface {}", number),
            Err(rusb::Error::NotFound) | Err(rusb::Error::NotSupported) => {}
            Err(e) => log::warn!("Kernel driver detach: {} (continuing)", e),
        }
        self.handle
            .claim_interface(number)
            .map_err(|e| {
                log::warn!("Claim interface {} failed: {}", number, e);
                RayNeoError::ClaimInterface(number)
            })?;
        self.claimed = Some(number);
        Ok(())
    }

    fn release_interface(&mut self, number: u8) {
        if self.claimed.take().is_some() {
            let _ = self.handle.release_interface(number);
        }
    }

    fn read(
        &mut self,
        endpoint: &EndpointDesc,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let result = match endpoint.transfer_type {
            TransferType::Interrupt => self.handle.read_interrupt(endpoint.address, buf, timeout),
            _ => self.handle.read_bulk(endpoint.address, buf, timeout),
        };
        result.or_else(Self::map_read_err)
    }

    fn write(&mut self, endpoint: &EndpointDesc, buf: &[u8], timeout: Duration) -> Result<usize> {
        let result = match endpoint.transfer_type {
            TransferType::Interrupt => self.handle.write_interrupt(endpoint.address, buf, timeout),
            _ => self.handle.write_bulk(endpoint.address, buf, timeout),
        };
        result.map_err(|e| match e {
            rusb::Error::NoDevice | rusb::Error::Pipe => RayNeoError::Disconnected,
            other => RayNeoError::Usb(other),
        })
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Some(number) = self.claimed.take() {
            let _ = self.handle.release_interface(number);
        }
    }
}

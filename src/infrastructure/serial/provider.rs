use crate::core::transport::{Port, PortInfo, PortProvider};
use crate::domain::{config::PortFilter, error::SerialTermResult};
use crate::infrastructure::serial::device::SerialDevice;
use async_trait::async_trait;
use serialport::{SerialPortInfo, SerialPortType};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hands out `SerialDevice`s for the ports the OS reports
pub struct SerialPortProvider {
    preferred: Option<String>,
}

impl SerialPortProvider {
    /// `preferred` names the port to use; without it the filter must match exactly one port
    pub fn new(preferred: Option<String>) -> Self {
        Self { preferred }
    }
}

fn port_info(port: &SerialPortInfo) -> PortInfo {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => PortInfo {
            name: port.port_name.clone(),
            description: usb
                .product
                .clone()
                .or_else(|| usb.manufacturer.clone())
                .unwrap_or_else(|| "USB serial".to_string()),
            usb_vendor_id: Some(usb.vid),
            usb_product_id: Some(usb.pid),
        },
        SerialPortType::PciPort => PortInfo {
            description: "PCI serial".to_string(),
            ..PortInfo::named(&port.port_name)
        },
        SerialPortType::BluetoothPort => PortInfo {
            description: "Bluetooth serial".to_string(),
            ..PortInfo::named(&port.port_name)
        },
        SerialPortType::Unknown => PortInfo::named(&port.port_name),
    }
}

/// Pick a port from the known set. `None` means nothing was chosen.
fn select_port(
    known: &[PortInfo],
    preferred: Option<&str>,
    filter: &PortFilter,
) -> Option<PortInfo> {
    if let Some(name) = preferred {
        // ports that enumeration misses (pty pairs, some adapters) can still be opened by name
        return Some(
            known
                .iter()
                .find(|p| p.name == name)
                .cloned()
                .unwrap_or_else(|| PortInfo::named(name)),
        );
    }

    let candidates: Vec<&PortInfo> = known
        .iter()
        .filter(|p| filter.matches(p.usb_vendor_id, p.usb_product_id))
        .collect();

    match candidates.as_slice() {
        [] => {
            info!("No serial port matches the selection filter");
            None
        }
        [only] => Some((*only).clone()),
        many => {
            warn!(
                "{} serial ports match the selection filter, name one with --port",
                many.len()
            );
            None
        }
    }
}

#[async_trait]
impl PortProvider for SerialPortProvider {
    fn is_supported(&self) -> bool {
        serialport::available_ports().is_ok()
    }

    async fn request_port(&self, filter: &PortFilter) -> SerialTermResult<Option<Arc<dyn Port>>> {
        let known = match self.known_ports().await {
            Ok(known) => known,
            Err(e) if self.preferred.is_some() => {
                warn!("Port enumeration failed, opening by name: {}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        debug!("{} serial ports known", known.len());

        Ok(select_port(&known, self.preferred.as_deref(), filter)
            .map(|info| Arc::new(SerialDevice::new(info)) as Arc<dyn Port>))
    }

    async fn known_ports(&self) -> SerialTermResult<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;
        Ok(ports.iter().map(port_info).collect())
    }
}

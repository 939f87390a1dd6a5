use rusb::{Direction, TransferType};

/// One endpoint from a device's interface descriptors.
#[derive(Debug, Clone, Copy)]
pub struct EndpointDesc {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

/// One interface with its endpoints, flattened from the descriptor tree.
#[derive(Debug, Clone)]
pub struct InterfaceDesc {
    pub number: u8,
    pub endpoints: Vec<EndpointDesc>,
}

/// The interface and endpoint pair a session talks through.
#[derive(Debug, Clone, Copy)]
pub struct EndpointSelection {
    pub interface_number: u8,
    pub ep_in: EndpointDesc,
    pub ep_out: EndpointDesc,
}

/// Pick the interface and IN/OUT endpoint pair to use.
///
/// Control endpoints are skipped; each interface contributes at most one IN
/// and one OUT endpoint (the first of each). An interface whose pair is
/// interrupt/interrupt wins immediately; otherwise the first interface with
/// any valid pair is remembered as a fallback.
pub fn select_endpoints(interfaces: &[InterfaceDesc]) -> Option<EndpointSelection> {
    let mut fallback: Option<EndpointSelection> = None;

    for interface in interfaces {
        let mut ep_in: Option<EndpointDesc> = None;
        let mut ep_out: Option<EndpointDesc> = None;

        for endpoint in &interface.endpoints {
            if endpoint.transfer_type == TransferType::Control {
                continue;
            }
            match endpoint.direction {
                Direction::In if ep_in.is_none() => ep_in = Some(*endpoint),
                Direction::Out if ep_out.is_none() => ep_out = Some(*endpoint),
                _ => {}
            }
        }

        if let (Some(ep_in), Some(ep_out)) = (ep_in, ep_out) {
            let selection = EndpointSelection {
                interface_number: interface.number,
                ep_in,
                ep_out,
            };
            if ep_in.transfer_type == TransferType::Interrupt
                && ep_out.transfer_type == TransferType::Interrupt
            {
                return Some(selection);
            }
            if fallback.is_none() {
                fallback = Some(selection);
            }
        }
    }

    fallback
}

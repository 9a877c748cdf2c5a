//! A single received BLE advertisement, independent of the scanner backend.

use crate::mac_address::MacAddress;
use crate::protocol::ProtocolFamily;
use std::collections::BTreeMap;
use std::time::SystemTime;
use uuid::Uuid;

/// Expand a 16-bit Bluetooth SIG UUID onto the base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5F9B_34FB)
}

/// One advertisement (or scan response) as delivered by the host's Bluetooth stack.
///
/// Manufacturer data is keyed by company id with the id already stripped
/// from the payload, which is how both BlueZ and the HCI parser report it.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub address: MacAddress,
    pub service_uuids: Vec<Uuid>,
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    pub name: Option<String>,
    pub timestamp: SystemTime,
}

impl Advertisement {
    pub fn new(address: MacAddress, timestamp: SystemTime) -> Self {
        Self {
            address,
            service_uuids: Vec::new(),
            manufacturer_data: BTreeMap::new(),
            name: None,
            timestamp,
        }
    }

    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuids.push(uuid);
        self
    }

    pub fn with_manufacturer_data(mut self, company_id: u16, data: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data.insert(company_id, data.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn advertises(&self, uuid: &Uuid) -> bool {
        self.service_uuids.contains(uuid)
    }

    /// Extract the frame the given family's decoder expects.
    ///
    /// The family's own company id is preferred; otherwise the first entry is
    /// used. Chipsea frames start at the company id itself (its low byte is
    /// the `0xCA` frame header), so the id is put back in front of the data.
    pub fn frame_for(&self, family: ProtocolFamily) -> Option<Vec<u8>> {
        let company_id = family.company_id()?;
        let (id, data) = self
            .manufacturer_data
            .get_key_value(&company_id)
            .or_else(|| self.manufacturer_data.iter().next())?;

        match family {
            ProtocolFamily::Chipsea => {
                let mut frame = Vec::with_capacity(data.len() + 2);
                frame.extend_from_slice(&id.to_le_bytes());
                frame.extend_from_slice(data);
                Some(frame)
            }
            _ => Some(data.clone()),
        }
    }
}

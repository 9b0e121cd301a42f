//! BLE Service, Characteristic and Descriptor UUIDs.
//!
//! Standard GATT assigned numbers plus the ST BlueNRG sensor-demo profile the
//! sample peripherals expose.

use uuid::Uuid;

/// Bluetooth Base UUID (`0000xxxx-0000-1000-8000-00805f9b34fb`).
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number to a full UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Get the 16-bit assigned number of a UUID derived from the Bluetooth Base UUID.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let mask = !(0xFFFF_FFFFu128 << 96);
    if value & mask == BLUETOOTH_BASE_UUID && value >> 112 == 0 {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

// Standard descriptors
/// Characteristic Extended Properties descriptor UUID.
pub const CHARACTERISTIC_EXTENDED_PROPERTIES_UUID: Uuid = uuid_from_u16(0x2900);
/// Characteristic User Description descriptor UUID.
pub const CHARACTERISTIC_USER_DESCRIPTION_UUID: Uuid = uuid_from_u16(0x2901);
/// Client Characteristic Configuration Descriptor UUID.
pub const CCCD_UUID: Uuid = uuid_from_u16(0x2902);

// Standard services
/// Generic Access service UUID.
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid = uuid_from_u16(0x1800);
/// Generic Attribute service UUID.
pub const GENERIC_ATTRIBUTE_SERVICE_UUID: Uuid = uuid_from_u16(0x1801);
/// Device Information service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = uuid_from_u16(0x180a);

// BlueNRG hardware sensor service (ST BlueST profile)
/// Hardware sensor service UUID.
pub const HW_SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0001_11e1_9ab4_0002a5d5c51b);
/// Environmental / gesture characteristic UUID (Read, Notify).
pub const ENVIRONMENTAL_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_0000_0001_11e1_ac36_0002a5d5c51b);
/// Accelerometer, gyroscope and magnetometer characteristic UUID.
pub const ACC_GYRO_MAG_CHAR_UUID: Uuid = Uuid::from_u128(0x00e0_0000_0001_11e1_ac36_0002a5d5c51b);

// BlueNRG software sensor service
/// Software sensor (sensor fusion) service UUID.
pub const SW_SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0002_11e1_9ab4_0002a5d5c51b);
/// Quaternions characteristic UUID (Notify).
pub const QUATERNIONS_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_0100_0001_11e1_ac36_0002a5d5c51b);

/// Check if a service UUID belongs to the BlueNRG sensor profile.
pub fn is_sensor_service(uuid: &Uuid) -> bool {
    *uuid == HW_SENSOR_SERVICE_UUID || *uuid == SW_SENSOR_SERVICE_UUID
}

/// Well-known UUIDs and their names.
const KNOWN_UUIDS: &[(Uuid, &str)] = &[
    (CCCD_UUID, "Client Characteristic Configuration"),
    (CHARACTERISTIC_USER_DESCRIPTION_UUID, "Characteristic User Description"),
    (CHARACTERISTIC_EXTENDED_PROPERTIES_UUID, "Characteristic Extended Properties"),
    (GENERIC_ACCESS_SERVICE_UUID, "Generic Access"),
    (GENERIC_ATTRIBUTE_SERVICE_UUID, "Generic Attribute"),
    (DEVICE_INFO_SERVICE_UUID, "Device Information"),
    (HW_SENSOR_SERVICE_UUID, "Hardware Sensors"),
    (SW_SENSOR_SERVICE_UUID, "Software Sensors"),
    (ENVIRONMENTAL_CHAR_UUID, "Environmental"),
    (ACC_GYRO_MAG_CHAR_UUID, "Acc/Gyro/Mag"),
    (QUATERNIONS_CHAR_UUID, "Quaternions"),
];

/// Human-readable name for well-known UUIDs.
pub fn describe(uuid: &Uuid) -> Option<&'static str> {
    KNOWN_UUIDS
        .iter()
        .find(|(known, _)| known == uuid)
        .map(|(_, name)| *name)
}

//! Known printer vendors
//!
//! Any USB device from a vendor in this table is treated as a printer,
//! whatever its descriptor strings say.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorInfo {
    pub id: u16,
    pub name: &'static str,
    /// Extra classifier text for sparse descriptors
    pub hint: &'static str,
}

pub static PRINTER_VENDORS: &[VendorInfo] = &[
    VendorInfo { id: 0x04b8, name: "Seiko Epson", hint: "thermal receipt" },
    VendorInfo { id: 0x0519, name: "Star Micronics", hint: "thermal receipt" },
    VendorInfo { id: 0x154f, name: "SNBC", hint: "thermal receipt" },
    VendorInfo { id: 0x0dd4, name: "Custom Engineering", hint: "thermal receipt" },
    VendorInfo { id: 0x1504, name: "Bixolon", hint: "thermal receipt" },
    VendorInfo { id: 0x0fe6, name: "ICS Advent (Xprinter)", hint: "thermal receipt" },
    VendorInfo { id: 0x1fc9, name: "NXP (POS printer)", hint: "thermal receipt" },
    VendorInfo { id: 0x0416, name: "Winbond (POS printer)", hint: "thermal receipt" },
    VendorInfo { id: 0x20d1, name: "Rongta", hint: "thermal receipt" },
    VendorInfo { id: 0x1d90, name: "Citizen", hint: "thermal receipt" },
    VendorInfo { id: 0x0a5f, name: "Zebra", hint: "label" },
    VendorInfo { id: 0x0922, name: "Dymo", hint: "label" },
    VendorInfo { id: 0x04f9, name: "Brother", hint: "" },
    VendorInfo { id: 0x1203, name: "TSC", hint: "label" },
    VendorInfo { id: 0x6868, name: "Gainscha", hint: "thermal receipt" },
    VendorInfo { id: 0x28e9, name: "GD32 (POS printer)", hint: "thermal receipt" },
];

pub fn lookup(vendor_id: u16) -> Option<&'static VendorInfo> {
    PRINTER_VENDORS.iter().find(|v| v.id == vendor_id)
}

pub fn is_printer_vendor(vendor_id: u16) -> bool {
    lookup(vendor_id).is_some()
}

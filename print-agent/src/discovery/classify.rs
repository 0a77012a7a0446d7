//! Printer type and capability inference
//!
//! An ordered rule table over lower-cased name/description text. The first
//! rule with a matching keyword wins; nothing matching means a standard
//! text-only printer.

use std::collections::BTreeSet;

use shared::models::{
    Capability, Confidence, IPP_PORT, LPR_PORT, PrinterRecord, PrinterType, RAW_SOCKET_PORT,
};

#[derive(Debug)]
pub struct ClassificationRule {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub printer_type: PrinterType,
    pub capabilities: &'static [Capability],
}

pub static RULES: &[ClassificationRule] = &[
    ClassificationRule {
        name: "kitchen",
        keywords: &["kitchen", "kds", "cocina", "bar printer"],
        printer_type: PrinterType::Kitchen,
        capabilities: &[Capability::Text, Capability::Cut, Capability::Buzzer],
    },
    ClassificationRule {
        name: "label",
        keywords: &[
            "label", "zebra", "dymo", "brother ql", "ql-", "godex", "sato", "tsc ",
        ],
        printer_type: PrinterType::Label,
        capabilities: &[Capability::Text, Capability::Barcode, Capability::Labels],
    },
    ClassificationRule {
        name: "thermal",
        keywords: &[
            "receipt", "pos", "thermal", "epson", "tm-", "star micronics", "star ", "tsp",
            "bixolon", "srp-", "citizen", "ct-s", "xprinter", "rongta", "sewoo", "custom vkp",
            "partner tech", "hprt", "escpos", "esc/pos",
        ],
        printer_type: PrinterType::Thermal,
        capabilities: &[
            Capability::Text,
            Capability::Barcode,
            Capability::Cut,
            Capability::CashDrawer,
            Capability::QrCode,
        ],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub printer_type: PrinterType,
    pub capabilities: BTreeSet<Capability>,
    pub confidence: Confidence,
}

impl Classification {
    pub fn standard() -> Self {
        Self {
            printer_type: PrinterType::Standard,
            capabilities: BTreeSet::from([Capability::Text]),
            confidence: Confidence::High,
        }
    }

    fn from_rule(rule: &ClassificationRule) -> Self {
        Self {
            printer_type: rule.printer_type,
            capabilities: rule.capabilities.iter().copied().collect(),
            confidence: Confidence::High,
        }
    }

    /// Write type, capabilities and confidence onto a record
    pub fn apply(self, record: &mut PrinterRecord) {
        record.printer_type = self.printer_type;
        record.capabilities = self.capabilities;
        record.confidence = self.confidence;
    }
}

/// Rule matching `text`, if any
pub fn matching_rule(text: &str) -> Option<&'static ClassificationRule> {
    let haystack = format!(" {} ", text.to_lowercase());
    RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| haystack.contains(k)))
}

/// Classify free text (name, description, make/model, vendor name)
pub fn classify(text: &str) -> Classification {
    matching_rule(text)
        .map(Classification::from_rule)
        .unwrap_or_else(Classification::standard)
}

/// Classify a record from its own descriptive fields
pub fn classify_record(record: &PrinterRecord) -> Classification {
    let text = [
        Some(record.name.as_str()),
        record.description.as_deref(),
        record.manufacturer.as_deref(),
        record.model.as_deref(),
        record.driver.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");
    classify(&text)
}

/// Provisional guess from an open TCP port alone
pub fn classify_port(port: u16) -> Classification {
    let (printer_type, caps): (PrinterType, &[Capability]) = match port {
        RAW_SOCKET_PORT => (
            PrinterType::Thermal,
            &[Capability::Text, Capability::Cut, Capability::Barcode],
        ),
        LPR_PORT | IPP_PORT => (PrinterType::Standard, &[Capability::Text]),
        _ => (PrinterType::Standard, &[Capability::Text]),
    };
    Classification {
        printer_type,
        capabilities: caps.iter().copied().collect(),
        confidence: Confidence::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{ConnectionType, DiscoveryMethod};

    #[test]
    fn test_thermal_vendor_names() {
        let c = classify("EPSON TM-T88");
        assert_eq!(c.printer_type, PrinterType::Thermal);
        assert!(c.capabilities.contains(&Capability::Cut));
        assert!(c.capabilities.contains(&Capability::CashDrawer));
        assert!(c.capabilities.contains(&Capability::Barcode));
    }

    #[test]
    fn test_kitchen_beats_thermal() {
        let c = classify("Kitchen Epson TM-T20");
        assert_eq!(c.printer_type, PrinterType::Kitchen);
        let c = classify("KDS screen printer");
        assert_eq!(c.printer_type, PrinterType::Kitchen);
    }

    #[test]
    fn test_label_printers() {
        assert_eq!(classify("Zebra ZD420").printer_type, PrinterType::Label);
        assert_eq!(classify("Brother QL-800").printer_type, PrinterType::Label);
        assert!(classify("DYMO LabelWriter").capabilities.contains(&Capability::Labels));
    }

    #[test]
    fn test_unknown_is_standard_text_only() {
        let c = classify("HP LaserJet 4000");
        assert_eq!(c, Classification::standard());
    }

    #[test]
    fn test_rule_names_are_ordered() {
        let names: Vec<_> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["kitchen", "label", "thermal"]);
    }

    #[test]
    fn test_port_classification_is_low_confidence() {
        let c = classify_port(RAW_SOCKET_PORT);
        assert_eq!(c.printer_type, PrinterType::Thermal);
        assert_eq!(c.confidence, Confidence::Low);
        assert_eq!(classify_port(IPP_PORT).printer_type, PrinterType::Standard);
    }

    #[test]
    fn test_classify_record_uses_description() {
        let mut record = PrinterRecord::new("Front", ConnectionType::System, DiscoveryMethod::System);
        record.description = Some("Receipt printer at the counter".into());
        classify_record(&record).apply(&mut record);
        assert_eq!(record.printer_type, PrinterType::Thermal);
    }
}

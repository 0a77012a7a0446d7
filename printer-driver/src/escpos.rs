//! ESC/POS command builder
//!
//! Provides a fluent API for building ESC/POS print data.

/// ESC/POS command builder
///
/// Builds ESC/POS byte sequences for thermal printers. Text is written as
/// UTF-8; non-ASCII characters are replaced with `?` when built, since the
/// agent does not select code pages.
pub struct EscPosBuilder {
    buf: Vec<u8>,
    width: usize,
}

impl EscPosBuilder {
    /// Create a new builder with the specified paper width in characters
    ///
    /// Common widths:
    /// - 58mm paper: 32 characters
    /// - 80mm paper: 48 characters
    pub fn new(width: usize) -> Self {
        let mut buf = Vec::with_capacity(1024);
        // Initialize printer (ESC @)
        buf.extend_from_slice(&[0x1B, 0x40]);
        Self { buf, width }
    }

    /// Get the configured paper width
    pub fn width(&self) -> usize {
        self.width
    }

    // === Text Output ===

    pub fn text(&mut self, s: &str) -> &mut Self {
        for ch in s.chars() {
            if ch.is_ascii() {
                self.buf.push(ch as u8);
            } else {
                self.buf.push(b'?');
            }
        }
        self
    }

    /// Write text followed by newline
    pub fn line(&mut self, s: &str) -> &mut Self {
        self.text(s);
        self.buf.push(b'\n');
        self
    }

    /// Feed n lines (ESC d n)
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[0x1B, 0x64, lines]);
        self
    }

    // === Alignment ===

    pub fn center(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[0x1B, 0x61, 0x01]);
        self
    }

    pub fn left(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[0x1B, 0x61, 0x00]);
        self
    }

    // === Text Style ===

    pub fn bold(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[0x1B, 0x45, 0x01]);
        self
    }

    pub fn bold_off(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[0x1B, 0x45, 0x00]);
        self
    }

    /// Double width and height
    pub fn double_size(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[0x1D, 0x21, 0x11]);
        self
    }

    pub fn reset_size(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[0x1D, 0x21, 0x00]);
        self
    }

    // === Separators ===

    pub fn sep_double(&mut self) -> &mut Self {
        self.line(&"=".repeat(self.width))
    }

    pub fn sep_single(&mut self) -> &mut Self {
        self.line(&"-".repeat(self.width))
    }

    // === Layout Helpers ===

    /// Print left and right text on the same line
    pub fn line_lr(&mut self, left: &str, right: &str) -> &mut Self {
        let lw = left.chars().count();
        let rw = right.chars().count();

        if lw + rw >= self.width {
            self.text(left);
            self.text(" ");
            self.line(right)
        } else {
            let spaces = self.width - lw - rw;
            self.text(left);
            self.text(&" ".repeat(spaces));
            self.line(right)
        }
    }

    // === Paper Control ===

    /// Full cut after feeding n lines (GS V 66 n)
    pub fn cut_feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[0x1D, 0x56, 0x42, lines]);
        self
    }

    /// Full cut (GS V 0)
    pub fn cut(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[0x1D, 0x56, 0x00]);
        self
    }

    // === Peripherals ===

    /// Open cash drawer (pin 2)
    pub fn open_drawer(&mut self) -> &mut Self {
        // ESC p m t1 t2 - Generate pulse on pin m
        self.buf.extend_from_slice(&[0x1B, 0x70, 0x00, 25, 250]);
        self
    }

    /// Sound the buzzer `times` times (ESC B n t)
    pub fn beep(&mut self, times: u8) -> &mut Self {
        self.buf.extend_from_slice(&[0x1B, 0x42, times.clamp(1, 9), 2]);
        self
    }

    /// Print a QR code (model 2, error correction L); size 1-16
    pub fn qr_code(&mut self, data: &str, size: u8) -> &mut Self {
        let size = size.clamp(1, 16);

        self.buf
            .extend_from_slice(&[0x1D, 0x28, 0x6B, 0x04, 0x00, 0x31, 0x41, 0x32, 0x00]);
        self.buf
            .extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x43, size]);
        self.buf
            .extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x45, 0x30]);

        let data_bytes = data.as_bytes();
        let len = data_bytes.len() + 3;
        self.buf.extend_from_slice(&[
            0x1D,
            0x28,
            0x6B,
            (len & 0xFF) as u8,
            ((len >> 8) & 0xFF) as u8,
            0x31,
            0x50,
            0x30,
        ]);
        self.buf.extend_from_slice(data_bytes);

        self.buf
            .extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30]);
        self
    }

    /// Write raw bytes directly
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new(48)
    }
}

/// Render plain text as a minimal ESC/POS document ending in a cut
pub fn render_text(content: &str, width: usize, cut: bool) -> Vec<u8> {
    let mut b = EscPosBuilder::new(width);
    b.left();
    for line in content.lines() {
        b.line(line);
    }
    if cut {
        b.cut_feed(4);
    } else {
        b.feed(3);
    }
    b.build()
}

/// Device features a test page should exercise
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFeatures {
    pub cut: bool,
    pub cash_drawer: bool,
    pub buzzer: bool,
    pub qr_code: bool,
}

/// Content of a printer self-test page
#[derive(Debug, Clone, Default)]
pub struct TestPage {
    pub printer_name: String,
    pub printer_id: String,
    pub connection: String,
    pub capabilities: Vec<String>,
    pub agent: String,
    pub timestamp: String,
}

impl TestPage {
    /// ESC/POS rendering; exercises only the features the device reports
    pub fn escpos(&self, width: usize, features: PageFeatures) -> Vec<u8> {
        let mut b = EscPosBuilder::new(width);
        b.center().double_size().line("PRINTER TEST").reset_size();
        b.sep_double();
        b.left();
        b.line_lr("Printer:", &self.printer_name);
        b.line_lr("ID:", &self.printer_id);
        b.line_lr("Connection:", &self.connection);
        b.line_lr("Agent:", &self.agent);
        b.line_lr("Time:", &self.timestamp);
        b.sep_single();
        b.bold().line("Capabilities").bold_off();
        for cap in &self.capabilities {
            b.line(&format!("  - {}", cap));
        }
        b.sep_single();
        b.center().line("If you can read this, printing works.");
        if features.qr_code {
            b.qr_code(&self.printer_id, 6);
        }
        if features.buzzer {
            b.beep(1);
        }
        if features.cash_drawer {
            b.open_drawer();
        }
        if features.cut {
            b.cut_feed(4);
        } else {
            b.feed(4);
        }
        b.build()
    }

    /// Plain text rendering for formatted (driver) printers
    pub fn plain(&self) -> String {
        let mut out = String::new();
        out.push_str("PRINTER TEST\n\n");
        out.push_str(&format!("Printer:    {}\n", self.printer_name));
        out.push_str(&format!("ID:         {}\n", self.printer_id));
        out.push_str(&format!("Connection: {}\n", self.connection));
        out.push_str(&format!("Agent:      {}\n", self.agent));
        out.push_str(&format!("Time:       {}\n", self.timestamp));
        out.push_str(&format!("Capabilities: {}\n", self.capabilities.join(", ")));
        out.push_str("\nIf you can read this, printing works.\n");
        out
    }
}

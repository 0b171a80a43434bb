//! Pairing code display
//!
//! The pairing code is printed as a terminal QR code so an operator can
//! scan it with the phone (Linked devices > Link a device).

use qrcode::render::unicode;
use qrcode::QrCode;
use tracing::{info, warn};

/// Render a pairing code as a block of unicode half-blocks
pub fn render_qr(code: &str) -> Result<String, qrcode::types::QrError> {
    let qr = QrCode::new(code.as_bytes())?;
    Ok(qr
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Show a pairing code on the operator console
pub fn present(code: &str) {
    info!("Pairing required: scan the QR code below with WhatsApp to link this device");
    match render_qr(code) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => {
            warn!("Could not render QR code ({}), raw pairing code: {}", e, code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_qr() {
        let rendered = render_qr("2@Q3kxSmFuZ3Vhc2VjcmV0,pubkey,identity,adv").unwrap();
        assert!(rendered.lines().count() > 10);
        assert!(rendered.contains('█') || rendered.contains('▀') || rendered.contains('▄'));
    }
}

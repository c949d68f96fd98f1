//! Handshake artifacts: QR images and pairing codes.

use {
    anyhow::{Context, Result},
    base64::Engine,
    chrono::{DateTime, Utc},
    serde_json::{Value, json},
};

/// Pixels per QR module when rendering to PNG.
const QR_SCALE: u32 = 8;
/// Quiet-zone width in modules around the rendered code.
const QR_QUIET_ZONE: u32 = 4;

/// The most recent handshake artifact for a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Qr {
        /// Raw QR payload handed out by the client library.
        raw: String,
        /// Rendered PNG image of the code.
        png: Vec<u8>,
        generated_at: DateTime<Utc>,
    },
    PairingCode {
        code: String,
        generated_at: DateTime<Utc>,
    },
}

impl Artifact {
    /// Build a QR artifact, rendering the payload to PNG bytes.
    pub fn qr(raw: &str) -> Result<Self> {
        Ok(Self::Qr {
            raw: raw.to_string(),
            png: render_qr_png(raw)?,
            generated_at: Utc::now(),
        })
    }

    pub fn pairing_code(code: &str) -> Self {
        Self::PairingCode {
            code: code.to_string(),
            generated_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Qr { .. } => "qr",
            Self::PairingCode { .. } => "pairing_code",
        }
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Qr { generated_at, .. } | Self::PairingCode { generated_at, .. } => {
                *generated_at
            },
        }
    }

    /// JSON shape for status/artifact queries. The PNG is base64-encoded.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Qr {
                raw,
                png,
                generated_at,
            } => json!({
                "kind": "qr",
                "qr": raw,
                "image": base64::engine::general_purpose::STANDARD.encode(png),
                "generatedAt": generated_at,
            }),
            Self::PairingCode { code, generated_at } => json!({
                "kind": "pairing_code",
                "code": code,
                "generatedAt": generated_at,
            }),
        }
    }
}

/// Render a QR payload as a grayscale PNG.
fn render_qr_png(data: &str) -> Result<Vec<u8>> {
    let code = qrcode::QrCode::new(data.as_bytes()).context("encoding qr payload")?;
    let width = code.width() as u32;
    let colors = code.to_colors();

    let size = (width + 2 * QR_QUIET_ZONE) * QR_SCALE;
    let mut img = image::GrayImage::from_pixel(size, size, image::Luma([255u8]));
    for (i, color) in colors.iter().enumerate() {
        if *color != qrcode::Color::Dark {
            continue;
        }
        let module_x = (i as u32 % width + QR_QUIET_ZONE) * QR_SCALE;
        let module_y = (i as u32 / width + QR_QUIET_ZONE) * QR_SCALE;
        for dy in 0..QR_SCALE {
            for dx in 0..QR_SCALE {
                img.put_pixel(module_x + dx, module_y + dy, image::Luma([0u8]));
            }
        }
    }

    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .context("encoding qr png")?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_renders_to_png() {
        let artifact = Artifact::qr("2@abcdefghijklmnop,qrstuvwxyz012345,ABCDEF==").unwrap();
        let Artifact::Qr { png, raw, .. } = &artifact else {
            panic!("expected qr artifact");
        };
        assert!(raw.starts_with("2@"));
        // PNG magic bytes.
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn artifact_json_shapes() {
        let qr = Artifact::qr("payload").unwrap();
        let json = qr.to_json();
        assert_eq!(json["kind"], "qr");
        assert_eq!(json["qr"], "payload");
        assert!(!json["image"].as_str().unwrap().is_empty());

        let code = Artifact::pairing_code("ABCD-1234");
        let json = code.to_json();
        assert_eq!(json["kind"], "pairing_code");
        assert_eq!(json["code"], "ABCD-1234");
    }
}

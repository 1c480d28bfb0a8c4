// routes/qrcode.rs
// GET /api/qrcode -> PNG QR code of the signed-in user's otpauth URL.

use axum::{
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
};
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;

use crate::error::ApiResult;
use crate::session::SessionUser;
use crate::totp::build_totp;

pub async fn qrcode(session: SessionUser) -> ApiResult<Response> {
    let user = session.user();
    let url = build_totp(&user.email, &user.secret)?.get_url();
    let png = render_png(&url)?;
    Ok(([(CONTENT_TYPE, "image/png")], png).into_response())
}

/// Renders `data` as a PNG QR code at least 200px wide.
pub fn render_png(data: &str) -> anyhow::Result<Vec<u8>> {
    let code = QrCode::new(data.as_bytes())?;
    let img = code.render::<Luma<u8>>().min_dimensions(200, 200).build();

    // image 0.25: write_to requires Write + Seek
    let mut cursor = Cursor::new(Vec::<u8>::new());
    image::DynamicImage::ImageLuma8(img).write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_png() {
        let png = render_png("otpauth://totp/PharmaLedger:a@b.c?secret=JBSWY3DPEHPK3PXP").unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}

//! Export of finished pixel art as PNG or SVG.

use image::{GenericImageView, ImageFormat, Rgba};
use serde::Deserialize;
use std::fmt::Write;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Png,
    Svg,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Svg => "image/svg+xml",
        }
    }
}

/// An exported file ready to send.
#[derive(Debug)]
pub struct ExportedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Convert stored output bytes into the requested format.
pub fn export(stored: &[u8], format: ExportFormat) -> Result<ExportedImage, ExportError> {
    match format {
        ExportFormat::Png => {
            if image::guess_format(stored).ok() == Some(ImageFormat::Png) {
                return Ok(ExportedImage {
                    bytes: stored.to_vec(),
                    content_type: format.content_type(),
                    extension: "png",
                });
            }
            let decoded = image::load_from_memory(stored)?;
            let mut out = std::io::Cursor::new(Vec::new());
            decoded.write_to(&mut out, ImageFormat::Png)?;
            Ok(ExportedImage {
                bytes: out.into_inner(),
                content_type: format.content_type(),
                extension: "png",
            })
        }
        ExportFormat::Svg => Ok(ExportedImage {
            bytes: render_svg(stored)?.into_bytes(),
            content_type: format.content_type(),
            extension: "svg",
        }),
    }
}

/// Render pixels as SVG rectangles, one per horizontal run of equal colour.
/// Fully transparent pixels are omitted.
pub fn render_svg(stored: &[u8]) -> Result<String, ExportError> {
    let img = image::load_from_memory(stored)?;
    let (width, height) = img.dimensions();

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}" shape-rendering="crispEdges">"#
    );

    for y in 0..height {
        let mut x = 0;
        while x < width {
            let pixel = img.get_pixel(x, y);
            let mut run = 1;
            while x + run < width && img.get_pixel(x + run, y) == pixel {
                run += 1;
            }
            if pixel[3] > 0 {
                push_rect(&mut svg, x, y, run, pixel);
            }
            x += run;
        }
    }

    svg.push_str("</svg>");
    Ok(svg)
}

fn push_rect(svg: &mut String, x: u32, y: u32, width: u32, pixel: Rgba<u8>) {
    let [r, g, b, a] = pixel.0;
    let _ = write!(
        svg,
        r##"<rect x="{x}" y="{y}" width="{width}" height="1" fill="#{r:02x}{g:02x}{b:02x}""##
    );
    if a < 255 {
        let _ = write!(svg, r#" fill-opacity="{:.3}""#, f64::from(a) / 255.0);
    }
    svg.push_str("/>");
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Stored output could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
}

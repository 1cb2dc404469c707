//! Best-effort image metadata carried in `FITSKeyword` elements.
//!
//! Extraction never decides whether a file can be loaded: the loader logs
//! a [`MetadataError`] and continues with [`ImageMetaData::default`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::header::Header;

/// Keywords mapped onto typed fields. Everything else is kept only in
/// [`ImageMetaData::keywords`].
const KNOWN_KEYWORDS: &[&str] = &[
    "OBJECT", "EXPOSURE", "EXPTIME", "INSTRUME", "TELESCOP", "FILTER",
    "GAIN", "OFFSET", "CCD-TEMP", "XBINNING", "YBINNING", "BAYERPAT",
];

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("header has no Image element")]
    NoImage,
    #[error("FITS keyword {name} has non-numeric value '{value}'")]
    NotANumber { name: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitsKeyword {
    pub name:    String,
    pub value:   String,
    pub comment: String,
}

impl FitsKeyword {
    pub fn new(name: &str, value: impl Into<String>, comment: &str) -> Self {
        Self { name: name.to_owned(), value: value.into(), comment: comment.to_owned() }
    }

    /// Value with FITS string quotes and padding removed.
    pub fn text(&self) -> &str {
        let v = self.value.trim();
        v.strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .unwrap_or(v)
            .trim()
    }

    fn number(&self) -> Result<f64, MetadataError> {
        self.text().parse::<f64>().map_err(|_| MetadataError::NotANumber {
            name:  self.name.clone(),
            value: self.value.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetaData {
    pub object_name:        Option<String>,
    /// Seconds.
    pub exposure_time:      Option<f64>,
    pub camera:             Option<String>,
    pub telescope:          Option<String>,
    pub filter:             Option<String>,
    pub gain:               Option<i32>,
    pub offset:             Option<i32>,
    /// Degrees Celsius.
    pub sensor_temperature: Option<f64>,
    pub binning:            Option<(u32, u32)>,
    pub bayer_pattern:      Option<String>,
    /// Every keyword found in the header, in document order.
    pub keywords:           Vec<FitsKeyword>,
}

impl ImageMetaData {
    pub fn from_header(header: &Header) -> Result<Self, MetadataError> {
        let image = header.image().map_err(|_| MetadataError::NoImage)?;
        let mut meta = ImageMetaData::default();
        let mut xbin = None;
        let mut ybin = None;

        for el in image.children_named("FITSKeyword") {
            let kw = FitsKeyword {
                name:    el.attr("name").unwrap_or_default().trim().to_owned(),
                value:   el.attr("value").unwrap_or_default().to_owned(),
                comment: el.attr("comment").unwrap_or_default().to_owned(),
            };
            match kw.name.as_str() {
                "OBJECT"               => meta.object_name = Some(kw.text().to_owned()),
                "EXPOSURE" | "EXPTIME" => meta.exposure_time = Some(kw.number()?),
                "INSTRUME"             => meta.camera = Some(kw.text().to_owned()),
                "TELESCOP"             => meta.telescope = Some(kw.text().to_owned()),
                "FILTER"               => meta.filter = Some(kw.text().to_owned()),
                "GAIN"                 => meta.gain = Some(kw.number()? as i32),
                "OFFSET"               => meta.offset = Some(kw.number()? as i32),
                "CCD-TEMP"             => meta.sensor_temperature = Some(kw.number()?),
                "XBINNING"             => xbin = Some(kw.number()? as u32),
                "YBINNING"             => ybin = Some(kw.number()? as u32),
                "BAYERPAT"             => meta.bayer_pattern = Some(kw.text().to_owned()),
                _                      => {}
            }
            meta.keywords.push(kw);
        }

        meta.binning = match (xbin, ybin) {
            (Some(x), Some(y)) => Some((x, y)),
            (Some(x), None)    => Some((x, x)),
            (None, Some(y))    => Some((y, y)),
            (None, None)       => None,
        };
        if meta.bayer_pattern.is_none() {
            meta.bayer_pattern = image
                .child("ColorFilterArray")
                .and_then(|cfa| cfa.attr("pattern"))
                .map(str::to_owned);
        }
        Ok(meta)
    }

    /// Keywords to write for this metadata: typed fields first, then any
    /// extra keyword not covered by a typed field.
    pub fn to_fits_keywords(&self) -> Vec<FitsKeyword> {
        let mut out = Vec::new();
        if let Some(v) = &self.object_name {
            out.push(FitsKeyword::new("OBJECT", quote(v), "Name of the object of interest"));
        }
        if let Some(v) = self.exposure_time {
            out.push(FitsKeyword::new("EXPOSURE", v.to_string(), "[s] Exposure duration"));
            out.push(FitsKeyword::new("EXPTIME", v.to_string(), "[s] Exposure duration"));
        }
        if let Some(v) = &self.camera {
            out.push(FitsKeyword::new("INSTRUME", quote(v), "Imaging instrument name"));
        }
        if let Some(v) = &self.telescope {
            out.push(FitsKeyword::new("TELESCOP", quote(v), "Name of telescope"));
        }
        if let Some(v) = &self.filter {
            out.push(FitsKeyword::new("FILTER", quote(v), "Active filter name"));
        }
        if let Some(v) = self.gain {
            out.push(FitsKeyword::new("GAIN", v.to_string(), "Sensor gain"));
        }
        if let Some(v) = self.offset {
            out.push(FitsKeyword::new("OFFSET", v.to_string(), "Sensor gain offset"));
        }
        if let Some(v) = self.sensor_temperature {
            out.push(FitsKeyword::new("CCD-TEMP", v.to_string(), "[degC] CCD temperature"));
        }
        if let Some((x, y)) = self.binning {
            out.push(FitsKeyword::new("XBINNING", x.to_string(), "X axis binning factor"));
            out.push(FitsKeyword::new("YBINNING", y.to_string(), "Y axis binning factor"));
        }
        if let Some(v) = &self.bayer_pattern {
            out.push(FitsKeyword::new("BAYERPAT", quote(v), "Sensor Bayer pattern"));
        }
        out.extend(
            self.keywords
                .iter()
                .filter(|kw| !KNOWN_KEYWORDS.contains(&kw.name.as_str()))
                .cloned(),
        );
        out
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

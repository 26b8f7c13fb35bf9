//! Camera sensor parameters behind `/control` and `/status`

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Snapshot of every sensor parameter, in `/status` order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorStatus {
    pub framesize: i32,
    pub quality: i32,
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub sharpness: i32,
    pub special_effect: i32,
    pub wb_mode: i32,
    pub awb: i32,
    pub awb_gain: i32,
    pub aec: i32,
    pub aec2: i32,
    pub ae_level: i32,
    pub aec_value: i32,
    pub agc: i32,
    pub agc_gain: i32,
    pub gainceiling: i32,
    pub bpc: i32,
    pub wpc: i32,
    pub raw_gma: i32,
    pub lenc: i32,
    pub vflip: i32,
    pub hmirror: i32,
    pub dcw: i32,
    pub colorbar: i32,
}

impl Default for SensorStatus {
    fn default() -> Self {
        Self {
            framesize: 5,
            quality: 10,
            brightness: 0,
            contrast: 0,
            saturation: 0,
            sharpness: 0,
            special_effect: 0,
            wb_mode: 0,
            awb: 1,
            awb_gain: 1,
            aec: 1,
            aec2: 0,
            ae_level: 0,
            aec_value: 168,
            agc: 1,
            agc_gain: 0,
            gainceiling: 0,
            bpc: 0,
            wpc: 1,
            raw_gma: 1,
            lenc: 1,
            vflip: 0,
            hmirror: 0,
            dcw: 1,
            colorbar: 0,
        }
    }
}

impl SensorStatus {
    fn field_mut(&mut self, name: &str) -> Option<&mut i32> {
        let field = match name {
            "framesize" => &mut self.framesize,
            "quality" => &mut self.quality,
            "brightness" => &mut self.brightness,
            "contrast" => &mut self.contrast,
            "saturation" => &mut self.saturation,
            "special_effect" => &mut self.special_effect,
            "wb_mode" => &mut self.wb_mode,
            "awb" => &mut self.awb,
            "awb_gain" => &mut self.awb_gain,
            "aec" => &mut self.aec,
            "aec2" => &mut self.aec2,
            "ae_level" => &mut self.ae_level,
            "aec_value" => &mut self.aec_value,
            "agc" => &mut self.agc,
            "agc_gain" => &mut self.agc_gain,
            "gainceiling" => &mut self.gainceiling,
            "bpc" => &mut self.bpc,
            "wpc" => &mut self.wpc,
            "raw_gma" => &mut self.raw_gma,
            "lenc" => &mut self.lenc,
            "vflip" => &mut self.vflip,
            "hmirror" => &mut self.hmirror,
            "dcw" => &mut self.dcw,
            "colorbar" => &mut self.colorbar,
            _ => return None,
        };
        Some(field)
    }
}

/// Inclusive value range accepted for a settable parameter
pub fn value_range(name: &str) -> Option<(i32, i32)> {
    let range = match name {
        "framesize" => (0, 13),
        "quality" => (0, 63),
        "brightness" | "contrast" | "saturation" | "ae_level" => (-2, 2),
        "special_effect" => (0, 6),
        "wb_mode" => (0, 4),
        "gainceiling" => (0, 6),
        "agc_gain" => (0, 30),
        "aec_value" => (0, 1200),
        "awb" | "awb_gain" | "aec" | "aec2" | "agc" | "bpc" | "wpc" | "raw_gma" | "lenc"
        | "vflip" | "hmirror" | "dcw" | "colorbar" => (0, 1),
        _ => return None,
    };
    Some(range)
}

/// Image sensor whose parameters can be read and changed at runtime
pub trait CameraSensor: Send + Sync {
    fn status(&self) -> SensorStatus;

    /// Apply one parameter. Unknown names and out-of-range values are
    /// [`Error::Sensor`].
    fn set(&self, name: &str, value: i32) -> Result<()>;
}

/// In-memory sensor used with the test-pattern frame source
#[derive(Debug, Default)]
pub struct SimulatedSensor {
    status: Mutex<SensorStatus>,
    jpeg_mode: bool,
}

impl SimulatedSensor {
    /// `jpeg_mode` mirrors whether the frame source delivers JPEG; frame size
    /// can only change in that mode.
    pub fn new(jpeg_mode: bool) -> Self {
        Self {
            status: Mutex::new(SensorStatus::default()),
            jpeg_mode,
        }
    }
}

impl CameraSensor for SimulatedSensor {
    fn status(&self) -> SensorStatus {
        *self.status.lock()
    }

    fn set(&self, name: &str, value: i32) -> Result<()> {
        let reject = |reason: String| Error::Sensor {
            name: name.to_string(),
            value,
            reason,
        };

        let (min, max) = value_range(name).ok_or_else(|| reject("unknown parameter".into()))?;
        if !(min..=max).contains(&value) {
            return Err(reject(format!("expected {}..={}", min, max)));
        }
        if name == "framesize" && !self.jpeg_mode {
            tracing::debug!(value, "Ignoring framesize outside JPEG mode");
            return Ok(());
        }

        let mut status = self.status.lock();
        let field = status
            .field_mut(name)
            .ok_or_else(|| reject("unknown parameter".into()))?;
        *field = value;
        tracing::info!(name, value, "Sensor parameter set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_schema_order() {
        let json = serde_json::to_string(&SensorStatus::default()).unwrap();
        let keys: Vec<&str> = json
            .trim_matches(|c| c == '{' || c == '}')
            .split(',')
            .map(|pair| pair.split(':').next().unwrap().trim_matches('"'))
            .collect();
        assert_eq!(
            keys,
            vec![
                "framesize", "quality", "brightness", "contrast", "saturation", "sharpness",
                "special_effect", "wb_mode", "awb", "awb_gain", "aec", "aec2", "ae_level",
                "aec_value", "agc", "agc_gain", "gainceiling", "bpc", "wpc", "raw_gma", "lenc",
                "vflip", "hmirror", "dcw", "colorbar",
            ]
        );
    }

    #[test]
    fn test_set_updates_status() {
        let sensor = SimulatedSensor::new(true);
        sensor.set("brightness", -2).unwrap();
        sensor.set("vflip", 1).unwrap();
        sensor.set("framesize", 8).unwrap();

        let status = sensor.status();
        assert_eq!(status.brightness, -2);
        assert_eq!(status.vflip, 1);
        assert_eq!(status.framesize, 8);
    }

    #[test]
    fn test_rejections() {
        let sensor = SimulatedSensor::new(true);
        assert!(matches!(sensor.set("zoom", 1), Err(Error::Sensor { .. })));
        assert!(matches!(sensor.set("sharpness", 1), Err(Error::Sensor { .. })));
        assert!(matches!(sensor.set("quality", 64), Err(Error::Sensor { .. })));
        assert_eq!(sensor.status(), SensorStatus::default());
    }

    #[test]
    fn test_framesize_ignored_outside_jpeg_mode() {
        let sensor = SimulatedSensor::new(false);
        sensor.set("framesize", 10).unwrap();
        assert_eq!(sensor.status().framesize, SensorStatus::default().framesize);
    }
}

use chrono::NaiveDate;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Sensor, processing level, path/row and acquisition date of a product id
const SCENE_ID_PATTERN: &str = r"^(L[COTEM]\d{2})_([A-Z0-9]{4})_(\d{6})_(\d{8})_";

fn scene_id_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(SCENE_ID_PATTERN).expect("scene id pattern compiles"))
}

/// Acquisition metadata carried in a Landsat product identifier,
/// e.g. `LC08_L1TP_220077_20230115_20230131_02_T1_B3.TIF`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneId {
    /// Sensor/satellite code (`LC08`, `LE07`, `LT05`, ...)
    pub satellite: String,
    pub processing_level: String,
    pub path_row: String,
    pub acquired: NaiveDate,
}

impl SceneId {
    /// Parse the identifier at the start of a band file name
    pub fn parse(file_name: &str) -> Option<Self> {
        let captures = scene_id_regex().captures(file_name)?;

        let acquired = NaiveDate::parse_from_str(&captures[4], "%Y%m%d").ok()?;
        Some(Self {
            satellite: captures[1].to_string(),
            processing_level: captures[2].to_string(),
            path_row: captures[3].to_string(),
            acquired,
        })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .map(|name| name.to_string_lossy())
            .and_then(|name| Self::parse(&name))
    }

    /// Acquisition date as ISO-8601
    pub fn date_string(&self) -> String {
        self.acquired.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collection2_name() {
        let scene = SceneId::parse("LC08_L1TP_220077_20230115_20230131_02_T1_B3.TIF").unwrap();
        assert_eq!(scene.satellite, "LC08");
        assert_eq!(scene.processing_level, "L1TP");
        assert_eq!(scene.path_row, "220077");
        assert_eq!(scene.date_string(), "2023-01-15");
    }

    #[test]
    fn test_parse_from_path() {
        let scene = SceneId::from_path(Path::new("/data/1999-08-01/LE07_L1TP_220077_19990801_20200918_02_T1_B2.TIF"));
        assert_eq!(scene.map(|s| s.satellite), Some("LE07".to_string()));
    }

    #[test]
    fn test_scene_id_pattern_compiles_once() {
        assert!(Regex::new(SCENE_ID_PATTERN).is_ok());
        assert!(std::ptr::eq(scene_id_regex(), scene_id_regex()));
    }

    #[test]
    fn test_rejects_foreign_names() {
        assert!(SceneId::parse("S2A_MSIL2A_20230115T133221_B03.jp2").is_none());
        assert!(SceneId::parse("LC08_L1TP_220077_20231345_20230131_02_T1_B3.TIF").is_none());
    }
}

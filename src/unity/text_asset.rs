use binrw::binrw;

use crate::unity::util::{AlignedBytes, AlignedString};

/// `TextAsset` (class 49). The script is kept as bytes since localization files are
/// not guaranteed to be valid UTF-8.
#[binrw]
#[derive(Debug, Clone, PartialEq)]
pub struct TextAsset {
    pub object_name: AlignedString,
    pub script: AlignedBytes,
}

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type HashMap<K, V> = FxHashMap<K, V>;

pub type HashSet<K> = FxHashSet<K>;

pub const NUM_CELL_TYPES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CellType {
    MF,
    GR,
    GO,
    BC,
    SC,
    PC,
    IO,
    DCN,
}

impl CellType {
    pub const ALL: [CellType; NUM_CELL_TYPES] = [
        CellType::MF,
        CellType::GR,
        CellType::GO,
        CellType::BC,
        CellType::SC,
        CellType::PC,
        CellType::IO,
        CellType::DCN,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_zonal(self) -> bool {
        matches!(
            self,
            CellType::BC | CellType::PC | CellType::IO | CellType::DCN
        )
    }

    pub fn raster_file_name(self) -> String {
        format!("all{}Raster.bin", self)
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellType::MF => "MF",
            CellType::GR => "GR",
            CellType::GO => "GO",
            CellType::BC => "BC",
            CellType::SC => "SC",
            CellType::PC => "PC",
            CellType::IO => "IO",
            CellType::DCN => "NC",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_match_declaration_order() {
        for (i, cell_type) in CellType::ALL.iter().enumerate() {
            assert_eq!(cell_type.index(), i);
        }
    }

    #[test]
    fn raster_file_names() {
        assert_eq!(CellType::GO.raster_file_name(), "allGORaster.bin");
        assert_eq!(CellType::DCN.raster_file_name(), "allNCRaster.bin");
    }
}

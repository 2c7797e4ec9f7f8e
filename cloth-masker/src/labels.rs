//! Label index maps of the human parsing models.

use crate::ClothType;

/// DensePose coarse body parts, each part spans one or more I-map indices.
pub const DENSEPOSE: &[(&str, &[u8])] = &[
    ("background", &[0]),
    ("torso", &[1, 2]),
    ("right hand", &[3]),
    ("left hand", &[4]),
    ("right foot", &[5]),
    ("left foot", &[6]),
    ("right thigh", &[7, 9]),
    ("left thigh", &[8, 10]),
    ("right leg", &[11, 13]),
    ("left leg", &[12, 14]),
    ("left big arm", &[15, 17]),
    ("right big arm", &[16, 18]),
    ("left forearm", &[19, 21]),
    ("right forearm", &[20, 22]),
    ("face", &[23, 24]),
    ("thighs", &[7, 8, 9, 10]),
    ("legs", &[11, 12, 13, 14]),
    ("hands", &[3, 4]),
    ("feet", &[5, 6]),
    ("big arms", &[15, 16, 17, 18]),
    ("forearms", &[19, 20, 21, 22]),
];

/// SCHP trained on ATR.
pub const ATR: &[(&str, u8)] = &[
    ("Background", 0),
    ("Hat", 1),
    ("Hair", 2),
    ("Sunglasses", 3),
    ("Upper-clothes", 4),
    ("Skirt", 5),
    ("Pants", 6),
    ("Dress", 7),
    ("Belt", 8),
    ("Left-shoe", 9),
    ("Right-shoe", 10),
    ("Face", 11),
    ("Left-leg", 12),
    ("Right-leg", 13),
    ("Left-arm", 14),
    ("Right-arm", 15),
    ("Bag", 16),
    ("Scarf", 17),
];

/// SCHP trained on LIP.
pub const LIP: &[(&str, u8)] = &[
    ("Background", 0),
    ("Hat", 1),
    ("Hair", 2),
    ("Glove", 3),
    ("Sunglasses", 4),
    ("Upper-clothes", 5),
    ("Dress", 6),
    ("Coat", 7),
    ("Socks", 8),
    ("Pants", 9),
    ("Jumpsuits", 10),
    ("Scarf", 11),
    ("Skirt", 12),
    ("Face", 13),
    ("Left-arm", 14),
    ("Right-arm", 15),
    ("Left-leg", 16),
    ("Right-leg", 17),
    ("Left-shoe", 18),
    ("Right-shoe", 19),
];

pub const ACCESSORIES: &[&str] = &[
    "Hat",
    "Glove",
    "Sunglasses",
    "Bag",
    "Left-shoe",
    "Right-shoe",
    "Scarf",
    "Socks",
];

pub const LIMBS: &[&str] = &["Left-arm", "Right-arm", "Left-leg", "Right-leg"];

/// Body parts that must survive when this garment type is replaced.
pub fn protect_body_parts(cloth_type: ClothType) -> &'static [&'static str] {
    match cloth_type {
        ClothType::Upper => &["Left-leg", "Right-leg"],
        ClothType::Lower => &["Right-arm", "Left-arm", "Face"],
        ClothType::Overall => &[],
    }
}

/// Other garments to keep, as `(ATR names, LIP names)`.
pub fn protect_cloth_parts(
    cloth_type: ClothType,
) -> (&'static [&'static str], &'static [&'static str]) {
    match cloth_type {
        ClothType::Upper => (&["Skirt", "Pants"], &["Skirt", "Pants"]),
        ClothType::Lower => (&["Upper-clothes"], &["Upper-clothes", "Coat"]),
        ClothType::Overall => (&[], &[]),
    }
}

/// Garment labels that are always repainted.
pub fn mask_cloth_parts(cloth_type: ClothType) -> &'static [&'static str] {
    match cloth_type {
        ClothType::Upper => &["Upper-clothes", "Coat", "Jacket", "Dress", "Jumpsuits"],
        ClothType::Lower => &["Pants", "Skirt", "Dress", "Jumpsuits"],
        ClothType::Overall => &["Upper-clothes", "Dress", "Pants", "Skirt", "Coat", "Jumpsuits"],
    }
}

/// DensePose parts whose area is repainted even when parsing misses them.
pub fn mask_dense_parts(cloth_type: ClothType) -> &'static [&'static str] {
    match cloth_type {
        ClothType::Upper => &["torso", "big arms", "forearms"],
        ClothType::Lower => &["thighs", "legs"],
        ClothType::Overall => &["torso", "thighs", "legs", "big arms", "forearms"],
    }
}

/// Label ids of `names` in a parsing table; names the table lacks are skipped.
pub fn parsing_ids(table: &[(&str, u8)], names: &[&str]) -> Vec<u8> {
    table
        .iter()
        .filter(|(name, _)| names.contains(name))
        .map(|&(_, id)| id)
        .collect()
}

pub fn densepose_ids(names: &[&str]) -> Vec<u8> {
    DENSEPOSE
        .iter()
        .filter(|(name, _)| names.contains(name))
        .flat_map(|(_, ids)| ids.iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_ids_skip_unknown_names() {
        assert_eq!(parsing_ids(ATR, &["Upper-clothes", "Coat", "Jacket"]), vec![4]);
        assert_eq!(parsing_ids(LIP, &["Upper-clothes", "Coat", "Jacket"]), vec![5, 7]);
        assert!(parsing_ids(LIP, &[]).is_empty());
    }

    #[test]
    fn test_densepose_ids() {
        let mut ids = densepose_ids(&["hands", "feet"]);
        ids.sort();
        assert_eq!(ids, vec![3, 4, 5, 6]);
        assert_eq!(densepose_ids(&["torso"]), vec![1, 2]);
    }

    #[test]
    fn test_tables_are_dense() {
        for (i, (_, id)) in ATR.iter().enumerate() {
            assert_eq!(i as u8, *id);
        }
        for (i, (_, id)) in LIP.iter().enumerate() {
            assert_eq!(i as u8, *id);
        }
    }
}

//! Property tests for binary search over encrypted directory pages.

use std::collections::BTreeSet;

use gtvol_volume::entry::{FileRecord, IndexRecord};
use gtvol_volume::{cipher, Entry, Lookup, Page, PageView, VarIntFlavor};
use proptest::prelude::*;

const FLAVORS: [VarIntFlavor; 2] = [VarIntFlavor::Grouped, VarIntFlavor::Prefixed];

/// Encode `page` and apply the table of contents transform.
fn encrypted(page: &Page, flavor: VarIntFlavor) -> Vec<u8> {
    let mut bytes = page.encode(flavor).unwrap();
    cipher::encrypt_header(&mut bytes);
    bytes
}

fn entry_page(names: &[String]) -> Page {
    Page::Entries(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                Entry::File(FileRecord {
                    name: name.clone(),
                    offset: i as u64 * 0x40,
                    compressed: i % 2 == 0,
                    compressed_size: i as u32 + 1,
                    uncompressed_size: i as u32 * 3 + 1,
                })
            })
            .collect(),
    )
}

fn index_page(names: &[String]) -> Page {
    Page::Index(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| IndexRecord {
                key: name.clone(),
                page: i as u16 + 1,
            })
            .collect(),
    )
}

/// Small alphabet and short names, so shared prefixes and names that are
/// prefixes of other names are common.
fn name_set() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[ab_]{1,6}", 1..48)
}

fn probe_keys() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[ab_c]{1,7}", 0..24)
}

proptest! {
    #[test]
    fn test_entry_page_finds_members_only(names in name_set(), keys in probe_keys()) {
        let names: Vec<String> = names.into_iter().collect();
        for flavor in FLAVORS {
            let bytes = encrypted(&entry_page(&names), flavor);
            let view = PageView::new(&bytes, flavor).unwrap();
            prop_assert!(!view.is_index());
            prop_assert_eq!(view.record_count(), names.len());

            for (i, name) in names.iter().enumerate() {
                prop_assert_eq!(view.find(name).unwrap(), Lookup::Found(i));
            }
            for key in keys.iter().filter(|key| !names.contains(key)) {
                prop_assert_eq!(view.find(key).unwrap(), Lookup::NotFound);
            }
        }
    }

    #[test]
    fn test_index_page_descends_to_floor_key(names in name_set(), keys in probe_keys()) {
        let names: Vec<String> = names.into_iter().collect();
        for flavor in FLAVORS {
            let bytes = encrypted(&index_page(&names), flavor);
            let view = PageView::new(&bytes, flavor).unwrap();
            prop_assert!(view.is_index());

            for (i, name) in names.iter().enumerate() {
                prop_assert_eq!(view.find(name).unwrap(), Lookup::Found(i));
                prop_assert_eq!(view.index_record(i).unwrap().page, i as u16 + 1);
            }
            for key in keys.iter().filter(|key| !names.contains(key)) {
                let below = names.partition_point(|name| name.as_bytes() < key.as_bytes());
                let expected = if below == 0 {
                    Lookup::NotFound
                } else {
                    Lookup::Descend(below - 1)
                };
                prop_assert_eq!(view.find(key).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_record_name_cmp_matches_byte_order(names in name_set(), key in "[ab_c]{0,7}") {
        let names: Vec<String> = names.into_iter().collect();
        let bytes = encrypted(&entry_page(&names), VarIntFlavor::Grouped);
        let view = PageView::new(&bytes, VarIntFlavor::Grouped).unwrap();

        for (i, name) in names.iter().enumerate() {
            prop_assert_eq!(
                view.record_name_cmp(i, key.as_bytes()).unwrap(),
                key.as_bytes().cmp(name.as_bytes())
            );
        }
    }
}

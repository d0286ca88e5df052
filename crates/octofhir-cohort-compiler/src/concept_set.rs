//! Concept set resolution
//!
//! A concept set expands into codeset rows `(codeset_id, concept_id)`:
//!
//! 1. every included item's own concept id
//! 2. descendants (via `concept_ancestor`, valid concepts only) of items with
//!    `includeDescendants`
//! 3. concepts mapped by a one-hop `Maps to` relationship onto items with `includeMapped`;
//!    only the item's own id is mapped, never the descendants it pulled in
//!
//! Excluded items expand the same way and are subtracted from the included expansion.

use crate::Dialect;
use crate::query::qualify;
use octofhir_cohort_model::{ConceptSet, ConceptSetItem};
use std::collections::BTreeSet;

/// Concept ids feeding one side (include or exclude) of a codeset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptSelection {
    pub direct: BTreeSet<i64>,
    pub descendants_of: BTreeSet<i64>,
    pub mapped_onto: BTreeSet<i64>,
}

impl ConceptSelection {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a ConceptSetItem>) -> Self {
        let mut selection = Self::default();
        for item in items {
            let Some(id) = item.concept_id else {
                continue;
            };
            selection.direct.insert(id);
            if item.include_descendants {
                selection.descendants_of.insert(id);
            }
            if item.include_mapped {
                selection.mapped_onto.insert(id);
            }
        }
        selection
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty()
    }

    /// Expand against an in-memory vocabulary
    pub fn resolve(&self, vocabulary: &dyn Vocabulary) -> BTreeSet<i64> {
        let mut ids: BTreeSet<i64> = self
            .direct
            .iter()
            .copied()
            .filter(|id| vocabulary.exists(*id))
            .collect();
        for ancestor in &self.descendants_of {
            ids.extend(
                vocabulary
                    .descendants(*ancestor)
                    .into_iter()
                    .filter(|id| vocabulary.is_valid(*id)),
            );
        }
        let mapped: Vec<i64> = self
            .mapped_onto
            .iter()
            .filter(|id| ids.contains(id))
            .flat_map(|id| vocabulary.mapped_onto(*id))
            .collect();
        ids.extend(mapped);
        ids
    }

    fn sql(&self, dialect: Dialect, vocabulary_schema: &str) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let concept = qualify(vocabulary_schema, "concept");
        let mut parts = vec![format!(
            "SELECT c.concept_id FROM {concept} c WHERE c.concept_id IN ({})",
            id_list(&self.direct)
        )];
        if !self.descendants_of.is_empty() {
            parts.push(format!(
                "SELECT c.concept_id FROM {concept} c\n\
                 JOIN {} ca ON c.concept_id = ca.descendant_concept_id\n\
                 WHERE ca.ancestor_concept_id IN ({}) AND c.invalid_reason IS NULL",
                qualify(vocabulary_schema, "concept_ancestor"),
                id_list(&self.descendants_of)
            ));
        }
        let union = dialect.union_distinct();
        if !self.mapped_onto.is_empty() {
            let included = parts.join(&format!("\n{union}\n"));
            parts.push(format!(
                "SELECT cr.concept_id_1 AS concept_id FROM (\n{included}\n) M\n\
                 JOIN {} cr ON M.concept_id = cr.concept_id_2\n\
                 WHERE M.concept_id IN ({}) AND cr.relationship_id = 'Maps to' AND cr.invalid_reason IS NULL",
                qualify(vocabulary_schema, "concept_relationship"),
                id_list(&self.mapped_onto)
            ));
        }
        Some(parts.join(&format!("\n{union}\n")))
    }
}

/// Vocabulary lookups used by the in-memory resolver
pub trait Vocabulary {
    /// The concept is present in the `concept` table
    fn exists(&self, concept_id: i64) -> bool;
    /// `invalid_reason IS NULL`
    fn is_valid(&self, concept_id: i64) -> bool;
    /// Descendants of `concept_id` per `concept_ancestor`, including itself
    fn descendants(&self, concept_id: i64) -> Vec<i64>;
    /// Source concepts with a valid `Maps to` relationship onto `concept_id`
    fn mapped_onto(&self, concept_id: i64) -> Vec<i64>;
}

/// Concept ids of a concept set against an in-memory vocabulary
pub fn resolve_concept_set(set: &ConceptSet, vocabulary: &dyn Vocabulary) -> BTreeSet<i64> {
    let include = ConceptSelection::from_items(set.included()).resolve(vocabulary);
    let exclude = ConceptSelection::from_items(set.excluded()).resolve(vocabulary);
    include.difference(&exclude).copied().collect()
}

/// Statement inserting the codeset rows of `set` into `codesets_table`
pub fn concept_set_statement(
    dialect: Dialect,
    vocabulary_schema: &str,
    codesets_table: &str,
    set: &ConceptSet,
) -> String {
    let insert = format!("INSERT INTO {codesets_table} (codeset_id, concept_id)");
    let include = ConceptSelection::from_items(set.included());
    let Some(include_sql) = include.sql(dialect, vocabulary_schema) else {
        return format!(
            "{insert}\nSELECT {} AS codeset_id, c.concept_id FROM {} c WHERE 1=0",
            set.id,
            qualify(vocabulary_schema, "concept")
        );
    };

    let mut sql = format!(
        "{insert}\nSELECT DISTINCT {} AS codeset_id, I.concept_id\nFROM (\n{include_sql}\n) I",
        set.id
    );
    if let Some(exclude_sql) = ConceptSelection::from_items(set.excluded()).sql(dialect, vocabulary_schema) {
        sql.push_str(&format!(
            "\nLEFT JOIN (\n{exclude_sql}\n) E ON I.concept_id = E.concept_id\nWHERE E.concept_id IS NULL"
        ));
    }
    sql
}

fn id_list(ids: &BTreeSet<i64>) -> String {
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// Tiny hierarchy: 1 -> {2, 3}, 3 -> {4}; 5 is invalid; 10 maps onto 1, 11 onto 4
    struct TestVocabulary {
        children: HashMap<i64, Vec<i64>>,
        invalid: BTreeSet<i64>,
        maps: HashMap<i64, Vec<i64>>,
    }

    impl TestVocabulary {
        fn new() -> Self {
            Self {
                children: HashMap::from([(1, vec![2, 3, 5]), (3, vec![4])]),
                invalid: BTreeSet::from([5]),
                maps: HashMap::from([(1, vec![10]), (4, vec![11])]),
            }
        }
    }

    impl Vocabulary for TestVocabulary {
        fn exists(&self, concept_id: i64) -> bool {
            (1..=12).contains(&concept_id)
        }

        fn is_valid(&self, concept_id: i64) -> bool {
            !self.invalid.contains(&concept_id)
        }

        fn descendants(&self, concept_id: i64) -> Vec<i64> {
            let mut out = vec![concept_id];
            for child in self.children.get(&concept_id).into_iter().flatten() {
                out.extend(self.descendants(*child));
            }
            out
        }

        fn mapped_onto(&self, concept_id: i64) -> Vec<i64> {
            self.maps.get(&concept_id).cloned().unwrap_or_default()
        }
    }

    fn resolve(items: Vec<ConceptSetItem>) -> BTreeSet<i64> {
        resolve_concept_set(&ConceptSet::new(1, items), &TestVocabulary::new())
    }

    #[test]
    fn test_resolve_direct_descendants_mapped() {
        assert_eq!(resolve(vec![ConceptSetItem::concept(1)]), BTreeSet::from([1]));
        assert_eq!(
            resolve(vec![ConceptSetItem::concept(1).with_descendants()]),
            BTreeSet::from([1, 2, 3, 4])
        );
        assert_eq!(
            resolve(vec![ConceptSetItem::concept(1).with_mapped()]),
            BTreeSet::from([1, 10])
        );
    }

    #[test]
    fn test_mapping_covers_item_not_its_descendants() {
        let ids = resolve(vec![ConceptSetItem::concept(1).with_descendants().with_mapped()]);
        assert_eq!(ids, BTreeSet::from([1, 2, 3, 4, 10]));

        let set = ConceptSet::new(
            2,
            vec![ConceptSetItem::concept(1).with_descendants().with_mapped()],
        );
        let sql = concept_set_statement(Dialect::Postgresql, "vocab", "codesets_s", &set);
        assert!(sql.contains("WHERE M.concept_id IN (1) AND cr.relationship_id = 'Maps to'"));
    }

    #[test]
    fn test_resolve_exclusion_subtracts_expansion() {
        let ids = resolve(vec![
            ConceptSetItem::concept(1).with_descendants(),
            ConceptSetItem::concept(3).with_descendants().excluded(),
        ]);
        assert_eq!(ids, BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_statement_shape() {
        let set = ConceptSet::new(
            7,
            vec![
                ConceptSetItem::concept(201826).with_descendants(),
                ConceptSetItem::concept(1567956).with_mapped(),
                ConceptSetItem::concept(40484648).excluded(),
            ],
        );
        let sql = concept_set_statement(Dialect::Postgresql, "vocab", "codesets_s", &set);

        assert!(sql.starts_with("INSERT INTO codesets_s (codeset_id, concept_id)\nSELECT DISTINCT 7 AS codeset_id"));
        assert!(sql.contains("WHERE c.concept_id IN (201826, 1567956)"));
        assert!(sql.contains("JOIN vocab.concept_ancestor ca ON c.concept_id = ca.descendant_concept_id"));
        assert!(sql.contains("WHERE ca.ancestor_concept_id IN (201826) AND c.invalid_reason IS NULL"));
        assert!(sql.contains("WHERE M.concept_id IN (1567956) AND cr.relationship_id = 'Maps to'"));
        assert!(sql.contains("WHERE c.concept_id IN (40484648)\n) E ON I.concept_id = E.concept_id"));
        assert!(sql.ends_with("WHERE E.concept_id IS NULL"));
    }

    #[test]
    fn test_statement_without_exclusions_has_no_left_join() {
        let set = ConceptSet::new(1, vec![ConceptSetItem::concept(1)]);
        let sql = concept_set_statement(Dialect::SqlServer, "cdm", "#codesets", &set);
        assert!(!sql.contains("LEFT JOIN"));
    }

    #[test]
    fn test_empty_set_is_provably_empty() {
        let set = ConceptSet::new(3, vec![ConceptSetItem::concept(9).excluded()]);
        let sql = concept_set_statement(Dialect::SqlServer, "cdm", "#codesets", &set);
        assert_eq!(
            sql,
            "INSERT INTO #codesets (codeset_id, concept_id)\nSELECT 3 AS codeset_id, c.concept_id FROM cdm.concept c WHERE 1=0"
        );
    }

    #[test]
    fn test_clickhouse_union_keyword() {
        let set = ConceptSet::new(1, vec![ConceptSetItem::concept(1).with_descendants()]);
        let sql = concept_set_statement(Dialect::ClickHouse, "cdm", "codesets", &set);
        assert!(sql.contains("\nUNION DISTINCT\n"));
    }

    fn item_strategy() -> impl Strategy<Value = ConceptSetItem> {
        (1i64..=12, any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(id, descendants, mapped, excluded)| ConceptSetItem {
                concept_id: Some(id),
                is_excluded: excluded,
                include_descendants: descendants,
                include_mapped: mapped,
            },
        )
    }

    proptest! {
        #[test]
        fn prop_descendants_never_shrink(
            items in prop::collection::vec(item_strategy(), 1..6),
            pick in 0usize..6,
        ) {
            let index = pick % items.len();
            prop_assume!(!items[index].is_excluded);
            let before = resolve(items.clone());
            let mut widened = items;
            widened[index].include_descendants = true;
            let after = resolve(widened);
            prop_assert!(before.is_subset(&after));
        }

        #[test]
        fn prop_exclusion_never_grows(
            items in prop::collection::vec(item_strategy(), 1..6),
            excluded in 1i64..=12,
            descendants in any::<bool>(),
        ) {
            let before = resolve(items.clone());
            let mut narrowed = items;
            let mut exclusion = ConceptSetItem::concept(excluded).excluded();
            exclusion.include_descendants = descendants;
            narrowed.push(exclusion);
            let after = resolve(narrowed);
            prop_assert!(after.is_subset(&before));
        }
    }
}

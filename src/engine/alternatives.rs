use std::cmp::Reverse;

use ulid::Ulid;

use crate::limits::MAX_ALTERNATIVES;
use crate::model::*;

use super::conflict::{conflict_count, validate_span};
use super::{Engine, EngineError};

/// Pick substitutes for `origin` from `(resource, conflict_count)` candidates.
///
/// Candidates must share the origin's category and be AVAILABLE. They are
/// ranked by conflict count, then newest first (`created_at`, then id), and
/// only the conflict-free ones are kept.
pub fn rank_alternatives(
    origin: Ulid,
    category: ResourceCategory,
    candidates: impl IntoIterator<Item = (Resource, usize)>,
) -> Vec<Resource> {
    let mut ranked: Vec<(Resource, usize)> = candidates
        .into_iter()
        .filter(|(r, _)| {
            r.id != origin && r.category == category && r.status == ResourceStatus::Available
        })
        .collect();
    ranked.sort_by_key(|(r, count)| (*count, Reverse(r.created_at), Reverse(r.id)));
    ranked
        .into_iter()
        .filter(|(_, count)| *count == 0)
        .map(|(r, _)| r)
        .take(MAX_ALTERNATIVES)
        .collect()
}

impl Engine {
    /// Same-category AVAILABLE resources free for the whole of `[start, end)`.
    pub async fn find_alternatives(
        &self,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Resource>, EngineError> {
        let span = validate_span(start, end)?;
        let category = {
            let rs = self
                .resource_state(&resource_id)
                .ok_or(EngineError::ResourceNotFound(resource_id))?;
            rs.read().await.resource.category
        };
        Ok(self.alternatives_for(resource_id, category, &span).await)
    }

    /// Scan every other resource. One read lock at a time, none held on return.
    pub(super) async fn alternatives_for(
        &self,
        origin: Ulid,
        category: ResourceCategory,
        span: &Span,
    ) -> Vec<Resource> {
        let mut candidates = Vec::new();
        for rs in self.all_resource_states() {
            let guard = rs.read().await;
            if guard.resource.id == origin
                || guard.resource.category != category
                || guard.resource.status != ResourceStatus::Available
            {
                continue;
            }
            candidates.push((guard.resource.clone(), conflict_count(&guard, span)));
        }
        let alternatives = rank_alternatives(origin, category, candidates);
        tracing::debug!(
            "alternatives for {origin} over [{}, {}): {}",
            span.start,
            span.end,
            alternatives.len()
        );
        alternatives
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn resource(category: ResourceCategory, status: ResourceStatus, created_at: Ms) -> Resource {
        Resource {
            id: Ulid::new(),
            name: format!("r{created_at}"),
            category,
            capacity: 1,
            location: None,
            status,
            attributes: BTreeMap::new(),
            created_at,
        }
    }

    #[test]
    fn keeps_only_conflict_free_same_category_available() {
        let origin = Ulid::new();
        let x = resource(ResourceCategory::Room, ResourceStatus::Available, 1);
        let y = resource(ResourceCategory::Room, ResourceStatus::Available, 2);
        let van = resource(ResourceCategory::Vehicle, ResourceStatus::Available, 3);
        let shut = resource(ResourceCategory::Room, ResourceStatus::Maintenance, 4);

        let picked = rank_alternatives(
            origin,
            ResourceCategory::Room,
            vec![(x.clone(), 0), (y, 1), (van, 0), (shut, 0)],
        );
        assert_eq!(picked, vec![x]);
    }

    #[test]
    fn newest_first_then_id_desc() {
        let origin = Ulid::new();
        let old = resource(ResourceCategory::Equipment, ResourceStatus::Available, 10);
        let new = resource(ResourceCategory::Equipment, ResourceStatus::Available, 20);
        let mut twin_a = resource(ResourceCategory::Equipment, ResourceStatus::Available, 15);
        let mut twin_b = resource(ResourceCategory::Equipment, ResourceStatus::Available, 15);
        twin_a.id = Ulid::from_parts(1, 1);
        twin_b.id = Ulid::from_parts(1, 2);

        let picked = rank_alternatives(
            origin,
            ResourceCategory::Equipment,
            vec![
                (old.clone(), 0),
                (twin_a.clone(), 0),
                (new.clone(), 0),
                (twin_b.clone(), 0),
            ],
        );
        let ids: Vec<Ulid> = picked.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![new.id, twin_b.id, twin_a.id, old.id]);
    }

    #[test]
    fn excludes_origin_and_caps_result() {
        let mut origin = resource(ResourceCategory::Room, ResourceStatus::Available, 100);
        origin.name = "origin".into();
        let mut candidates = vec![(origin.clone(), 0)];
        for i in 0..(MAX_ALTERNATIVES as Ms + 3) {
            candidates.push((resource(ResourceCategory::Room, ResourceStatus::Available, i), 0));
        }
        let picked = rank_alternatives(origin.id, ResourceCategory::Room, candidates);
        assert_eq!(picked.len(), MAX_ALTERNATIVES);
        assert!(picked.iter().all(|r| r.id != origin.id));
    }

    #[test]
    fn empty_pool_is_a_normal_answer() {
        let picked = rank_alternatives(Ulid::new(), ResourceCategory::Vehicle, Vec::new());
        assert!(picked.is_empty());
    }
}

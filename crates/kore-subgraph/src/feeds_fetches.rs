//! Reusable feed/fetch plan for repeatedly executing a nested graph.
//!
//! Name-to-index resolution and device placement are computed once. Each
//! iteration of the driver then only consults the plan to decide which feeds
//! and fetches need a device copy and which fetch becomes which feed of the
//! next iteration.

use kore_core::{Device, KoreError, Result};

use crate::session::SessionState;

/// Where a value comes from and where it has to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyInfo {
    pub source: Device,
    pub target: Device,
}

impl CopyInfo {
    pub fn needs_copy(&self) -> bool {
        self.source.requires_copy_to(self.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanState {
    Created,
    Initialized,
    Finalized,
}

#[derive(Debug, Clone)]
pub struct FeedsFetchesManager {
    feed_names: Vec<String>,
    fetch_names: Vec<String>,
    feed_indices: Vec<usize>,
    fetch_indices: Vec<usize>,
    feed_copy: Vec<CopyInfo>,
    fetch_copy: Vec<CopyInfo>,
    /// `(fetch, feed)` pairs where the fetch is fed back on the next
    /// iteration.
    recurrent: Vec<(usize, usize)>,
    state: PlanState,
}

impl FeedsFetchesManager {
    /// Resolve feed and fetch names against `values`.
    pub fn create(feed_names: Vec<String>, fetch_names: Vec<String>, values: &dyn SessionState) -> Result<Self> {
        let resolve = |names: &[String], kind: &str| -> Result<Vec<usize>> {
            names
                .iter()
                .map(|name| {
                    values
                        .value_index(name)
                        .map_err(|_| KoreError::GraphError(format!("{kind} '{name}' is not a value of the graph")))
                })
                .collect()
        };
        let feed_indices = resolve(&feed_names, "feed")?;
        let fetch_indices = resolve(&fetch_names, "fetch")?;

        let recurrent = fetch_names
            .iter()
            .enumerate()
            .filter_map(|(fetch, name)| {
                let past = past_name_for(name)?;
                let feed = feed_names.iter().position(|f| *f == past)?;
                Some((fetch, feed))
            })
            .collect();

        let unplaced = CopyInfo {
            source: Device::Cpu,
            target: Device::Cpu,
        };
        Ok(Self {
            feed_copy: vec![unplaced; feed_names.len()],
            fetch_copy: vec![unplaced; fetch_names.len()],
            feed_names,
            fetch_names,
            feed_indices,
            fetch_indices,
            recurrent,
            state: PlanState::Created,
        })
    }

    /// Record where `session` consumes each feed and produces each fetch.
    pub fn initialize_copy_info(&mut self, session: &dyn SessionState) -> Result<()> {
        if self.state != PlanState::Created {
            return Err(KoreError::invalid_argument("feed/fetch copy info is already initialized"));
        }
        let feed_targets = self.locations(&self.feed_names, session)?;
        let fetch_sources = self.locations(&self.fetch_names, session)?;
        for (info, target) in self.feed_copy.iter_mut().zip(feed_targets) {
            info.target = target;
        }
        for (info, source) in self.fetch_copy.iter_mut().zip(fetch_sources) {
            info.source = source;
        }
        self.state = PlanState::Initialized;
        Ok(())
    }

    /// Record where the caller will supply each feed and wants each fetch.
    pub fn finalize_copy_info(&mut self, feed_locations: &[Device], fetch_locations: &[Device]) -> Result<()> {
        if self.state != PlanState::Initialized {
            return Err(KoreError::invalid_argument(
                "feed/fetch copy info must be initialized exactly once before it is finalized",
            ));
        }
        kore_core::invalid_if!(
            feed_locations.len() != self.feed_copy.len(),
            "expected {} feed locations, got {}",
            self.feed_copy.len(),
            feed_locations.len()
        );
        kore_core::invalid_if!(
            fetch_locations.len() != self.fetch_copy.len(),
            "expected {} fetch locations, got {}",
            self.fetch_copy.len(),
            fetch_locations.len()
        );
        for (info, &source) in self.feed_copy.iter_mut().zip(feed_locations) {
            info.source = source;
        }
        for (info, &target) in self.fetch_copy.iter_mut().zip(fetch_locations) {
            info.target = target;
        }
        self.state = PlanState::Finalized;
        Ok(())
    }

    fn locations(&self, names: &[String], session: &dyn SessionState) -> Result<Vec<Device>> {
        names.iter().map(|name| session.memory_location(name)).collect()
    }

    pub fn is_finalized(&self) -> bool {
        self.state == PlanState::Finalized
    }

    pub fn feed_names(&self) -> &[String] {
        &self.feed_names
    }

    pub fn fetch_names(&self) -> &[String] {
        &self.fetch_names
    }

    /// Session value indices of the feeds, in feed order.
    pub fn feed_indices(&self) -> &[usize] {
        &self.feed_indices
    }

    pub fn fetch_indices(&self) -> &[usize] {
        &self.fetch_indices
    }

    pub fn feed_copy_info(&self) -> &[CopyInfo] {
        &self.feed_copy
    }

    pub fn fetch_copy_info(&self) -> &[CopyInfo] {
        &self.fetch_copy
    }

    pub fn feed_needs_copy(&self, feed: usize) -> bool {
        self.feed_copy.get(feed).is_some_and(CopyInfo::needs_copy)
    }

    pub fn fetch_needs_copy(&self, fetch: usize) -> bool {
        self.fetch_copy.get(fetch).is_some_and(CopyInfo::needs_copy)
    }

    /// Whether any feed or fetch crosses a device boundary.
    pub fn needs_any_copy(&self) -> bool {
        self.feed_copy.iter().chain(&self.fetch_copy).any(CopyInfo::needs_copy)
    }

    /// `(fetch, feed)` pairs: fetch `present*` feeds `past*` next iteration.
    pub fn recurrent_pairs(&self) -> &[(usize, usize)] {
        &self.recurrent
    }

    /// Feed that receives fetch `fetch` on the next iteration.
    pub fn next_feed_for(&self, fetch: usize) -> Option<usize> {
        self.recurrent.iter().find(|(f, _)| *f == fetch).map(|&(_, feed)| feed)
    }
}

/// `present_3` -> `past_3`, `present_key_self_0` -> `past_key_self_0`.
fn past_name_for(fetch: &str) -> Option<String> {
    fetch.strip_prefix("present").map(|rest| format!("past{rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ExecutionProvider, SessionStateMap};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn session() -> SessionStateMap {
        SessionStateMap::new([ExecutionProvider::Cuda(0), ExecutionProvider::Cpu])
            .with_values(["input_ids", "position_ids"], Device::Cpu)
            .with_values(["past_0", "past_1", "logits", "present_0", "present_1"], Device::Cuda(0))
    }

    #[test]
    fn test_create_resolves_indices() {
        let s = session();
        let ffm = FeedsFetchesManager::create(
            names(&["input_ids", "past_0", "past_1"]),
            names(&["logits", "present_0", "present_1"]),
            &s,
        )
        .unwrap();
        assert_eq!(ffm.feed_indices(), &[0, 2, 3]);
        assert_eq!(ffm.fetch_indices(), &[4, 5, 6]);
        assert_eq!(ffm.recurrent_pairs(), &[(1, 1), (2, 2)]);
        assert_eq!(ffm.next_feed_for(0), None);
        assert_eq!(ffm.next_feed_for(2), Some(2));
        assert!(!ffm.is_finalized());
    }

    #[test]
    fn test_create_unknown_name() {
        let err = FeedsFetchesManager::create(names(&["nope"]), vec![], &session()).unwrap_err();
        assert!(matches!(err, KoreError::GraphError(ref m) if m.contains("feed 'nope'")));
        let err = FeedsFetchesManager::create(vec![], names(&["gone"]), &session()).unwrap_err();
        assert!(matches!(err, KoreError::GraphError(ref m) if m.contains("fetch 'gone'")));
    }

    #[test]
    fn test_copy_info() {
        let s = session();
        let mut ffm =
            FeedsFetchesManager::create(names(&["input_ids", "past_0"]), names(&["logits", "present_0"]), &s).unwrap();
        ffm.initialize_copy_info(&s).unwrap();
        ffm.finalize_copy_info(&[Device::Cuda(0), Device::Cuda(0)], &[Device::Cuda(0), Device::Cuda(0)])
            .unwrap();
        assert!(ffm.is_finalized());
        // input_ids is consumed on the host but supplied on the device.
        assert!(ffm.feed_needs_copy(0));
        assert!(!ffm.feed_needs_copy(1));
        assert!(!ffm.fetch_needs_copy(0));
        assert!(!ffm.fetch_needs_copy(1));
        assert!(!ffm.fetch_needs_copy(9));
        assert!(ffm.needs_any_copy());
        assert_eq!(
            ffm.feed_copy_info()[0],
            CopyInfo {
                source: Device::Cuda(0),
                target: Device::Cpu
            }
        );
    }

    #[test]
    fn test_host_memory_is_interchangeable() {
        let s = SessionStateMap::default().with_values(["a", "b"], Device::Cpu);
        let mut ffm = FeedsFetchesManager::create(names(&["a"]), names(&["b"]), &s).unwrap();
        ffm.initialize_copy_info(&s).unwrap();
        ffm.finalize_copy_info(&[Device::CudaPinned(0)], &[Device::Cpu]).unwrap();
        assert!(!ffm.needs_any_copy());
    }

    #[test]
    fn test_finalize_order_and_lengths() {
        let s = session();
        let mut ffm = FeedsFetchesManager::create(names(&["input_ids"]), names(&["logits"]), &s).unwrap();
        assert!(ffm.finalize_copy_info(&[Device::Cpu], &[Device::Cpu]).is_err());
        ffm.initialize_copy_info(&s).unwrap();
        assert!(ffm.initialize_copy_info(&s).is_err());
        let err = ffm.finalize_copy_info(&[], &[Device::Cpu]).unwrap_err();
        assert!(err.to_string().contains("expected 1 feed locations, got 0"));
        assert!(!ffm.is_finalized());
        ffm.finalize_copy_info(&[Device::Cpu], &[Device::Cpu]).unwrap();
        assert!(ffm.finalize_copy_info(&[Device::Cpu], &[Device::Cpu]).is_err());
    }

    #[test]
    fn test_past_name_mapping() {
        assert_eq!(past_name_for("present_3").as_deref(), Some("past_3"));
        assert_eq!(past_name_for("present_value_self_1").as_deref(), Some("past_value_self_1"));
        assert_eq!(past_name_for("logits"), None);
    }
}

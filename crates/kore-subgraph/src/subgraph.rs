//! Binding of a nested decoder graph to the sessions that execute it.
//!
//! [`Subgraph::setup`] runs once per owning node. It places every feed and
//! fetch, builds the [`FeedsFetchesManager`] plan reused on every decoding
//! step and validates the graph's recurrent-state shapes. Everything derived
//! there is immutable afterwards.

use std::sync::Arc;

use kore_core::{Device, KoreError, Result, SymbolicShape};

use crate::convention::{SubgraphConvention, SubgraphLayout};
use crate::feeds_fetches::FeedsFetchesManager;
use crate::graph::{GraphDef, NodeDef};
use crate::session::{ExecutionProvider, SessionState};

/// Dimensions read from the declared past-state and logits shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeParameters {
    pub num_heads: usize,
    pub head_size: usize,
    pub vocab_size: usize,
}

/// Everything `setup` derives.
#[derive(Debug, Clone)]
pub struct SubgraphParameters {
    pub num_heads: usize,
    pub head_size: usize,
    pub vocab_size: usize,
    pub num_layers: usize,
    pub is_output_float16: bool,
    /// Device of the first output; fetches and synthesized feeds live here.
    pub anchor: Device,
    pub layout: SubgraphLayout,
}

#[derive(Debug)]
struct Bound {
    params: SubgraphParameters,
    plan: Arc<FeedsFetchesManager>,
}

#[derive(Debug)]
pub struct Subgraph {
    node: Arc<NodeDef>,
    attribute: String,
    graph: Arc<GraphDef>,
    convention: Arc<dyn SubgraphConvention>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    num_implicit_inputs: usize,
    bound: Option<Bound>,
}

impl Subgraph {
    /// Record the nested graph held in `attribute` of `node`.
    pub fn new(
        node: Arc<NodeDef>,
        attribute: impl Into<String>,
        graph: Arc<GraphDef>,
        convention: Arc<dyn SubgraphConvention>,
    ) -> Self {
        Self {
            num_implicit_inputs: node.implicit_inputs.len(),
            input_names: graph.input_names(),
            output_names: graph.output_names(),
            node,
            attribute: attribute.into(),
            graph,
            convention,
            bound: None,
        }
    }

    /// Bind feeds and fetches and validate the graph. Runs once; a failed
    /// call leaves the subgraph unbound, a repeated call is rejected.
    pub fn setup(&mut self, outer: &dyn SessionState, inner: &dyn SessionState) -> Result<()> {
        if self.bound.is_some() {
            return Err(KoreError::invalid_argument(format!(
                "subgraph '{}' of node '{}' is already set up",
                self.attribute, self.node.name
            )));
        }
        let first_output = self.output_names.first().ok_or_else(|| {
            KoreError::invalid_argument(format!("subgraph '{}' declares no outputs", self.attribute))
        })?;

        // Inputs the driver synthesizes (position ids, masks, past state)
        // have no placement of their own and follow the first output.
        let anchor = inner.memory_location(first_output)?;

        let mut feed_names = Vec::with_capacity(self.input_names.len() + self.num_implicit_inputs);
        let mut feed_locations = Vec::with_capacity(feed_names.capacity());
        for name in &self.input_names {
            feed_names.push(name.clone());
            feed_locations.push(anchor);
        }
        for name in &self.node.implicit_inputs {
            feed_names.push(name.clone());
            feed_locations.push(outer.memory_location(name)?);
        }

        let mut plan = FeedsFetchesManager::create(feed_names, self.output_names.clone(), inner)?;
        plan.initialize_copy_info(inner)?;
        let fetch_locations = vec![anchor; self.output_names.len()];
        plan.finalize_copy_info(&feed_locations, &fetch_locations)?;

        let params = self.validate(anchor)?;
        tracing::info!(
            node = %self.node.name,
            attribute = %self.attribute,
            convention = self.convention.name(),
            %anchor,
            num_layers = params.num_layers,
            num_heads = params.num_heads,
            head_size = params.head_size,
            vocab_size = params.vocab_size,
            "subgraph bound"
        );
        tracing::debug!(
            feeds = plan.feed_names().len(),
            fetches = plan.fetch_names().len(),
            needs_copy = plan.needs_any_copy(),
            "feed/fetch plan finalized"
        );
        self.bound = Some(Bound {
            params,
            plan: Arc::new(plan),
        });
        Ok(())
    }

    fn validate(&self, anchor: Device) -> Result<SubgraphParameters> {
        let layout = self.convention.validate(&self.graph)?;
        let present = &self.graph.outputs[layout.first_present_output];
        let logits = &self.graph.outputs[0];
        let declared = |shape: &Option<SymbolicShape>, name: &str| {
            shape
                .clone()
                .ok_or_else(|| KoreError::invalid_argument(format!("subgraph output {name} has no declared shape")))
        };
        let shapes = Self::get_parameters(
            &declared(&present.shape, &present.name)?,
            &declared(&logits.shape, &logits.name)?,
            layout.merged_past,
        )?;
        Ok(SubgraphParameters {
            num_heads: shapes.num_heads,
            head_size: shapes.head_size,
            vocab_size: shapes.vocab_size,
            num_layers: layout.num_layers,
            is_output_float16: layout.is_output_float16,
            anchor,
            layout,
        })
    }

    /// Read heads, head size and vocabulary size from declared shapes.
    ///
    /// Merged past state is `(2, batch, num_heads, past_seq, head_size)`;
    /// otherwise key and value are separate `(batch, num_heads, past_seq,
    /// head_size)` tensors. Logits are `(batch, seq, vocab_size)`. The sizes
    /// read must be static and positive.
    pub fn get_parameters(
        past_shape: &SymbolicShape,
        logits_shape: &SymbolicShape,
        merged_past: bool,
    ) -> Result<ShapeParameters> {
        let positive = |shape: &SymbolicShape, axis: usize| shape.fixed(axis).filter(|&v| v > 0).map(|v| v as usize);

        let (heads_axis, head_size_axis) = if merged_past {
            kore_core::invalid_if!(
                past_shape.ndim() != 5,
                "subgraph past state is expected to have 5 dimension, got {}",
                past_shape.ndim()
            );
            kore_core::invalid_if!(
                past_shape.fixed(0) != Some(2),
                "subgraph past state dimension 0 shall have length of 2"
            );
            (2, 4)
        } else {
            kore_core::invalid_if!(
                past_shape.ndim() != 4,
                "subgraph past state is expected to have 4 dimension, got {}",
                past_shape.ndim()
            );
            (1, 3)
        };
        let num_heads = positive(past_shape, heads_axis).ok_or_else(|| {
            KoreError::invalid_argument(format!(
                "subgraph past state dimension {heads_axis} shall have a positive value for number of heads"
            ))
        })?;
        let head_size = positive(past_shape, head_size_axis).ok_or_else(|| {
            KoreError::invalid_argument(format!(
                "subgraph past state dimension {head_size_axis} shall have a positive value for hidden size per head"
            ))
        })?;

        kore_core::invalid_if!(
            logits_shape.ndim() != 3,
            "subgraph logits output is expected to have 3 dimension, got {}",
            logits_shape.ndim()
        );
        let vocab_size = positive(logits_shape, 2).ok_or_else(|| {
            KoreError::invalid_argument("subgraph logits output dimension 2 shall have a positive value for vocabulary size")
        })?;

        Ok(ShapeParameters {
            num_heads,
            head_size,
            vocab_size,
        })
    }

    /// Provider the driver should run the graph with.
    pub fn preferred_provider(outer: &dyn SessionState) -> ExecutionProvider {
        outer
            .providers()
            .iter()
            .copied()
            .find(|p| matches!(p, ExecutionProvider::Cuda(_)))
            .unwrap_or(ExecutionProvider::Cpu)
    }

    pub fn is_setup(&self) -> bool {
        self.bound.is_some()
    }

    pub fn node(&self) -> &NodeDef {
        &self.node
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn graph(&self) -> &GraphDef {
        &self.graph
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn num_implicit_inputs(&self) -> usize {
        self.num_implicit_inputs
    }

    /// Derived parameters, once set up.
    pub fn parameters(&self) -> Option<&SubgraphParameters> {
        self.bound.as_ref().map(|b| &b.params)
    }

    pub fn num_heads(&self) -> Option<usize> {
        self.parameters().map(|p| p.num_heads)
    }

    pub fn head_size(&self) -> Option<usize> {
        self.parameters().map(|p| p.head_size)
    }

    pub fn vocab_size(&self) -> Option<usize> {
        self.parameters().map(|p| p.vocab_size)
    }

    pub fn num_layers(&self) -> Option<usize> {
        self.parameters().map(|p| p.num_layers)
    }

    pub fn is_output_float16(&self) -> Option<bool> {
        self.parameters().map(|p| p.is_output_float16)
    }

    /// The shared plan, once set up.
    pub fn feeds_fetches_manager(&self) -> Option<&Arc<FeedsFetchesManager>> {
        self.bound.as_ref().map(|b| &b.plan)
    }
}

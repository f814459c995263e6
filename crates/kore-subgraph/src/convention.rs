//! Input/output conventions of the decoder graphs a generation driver runs.
//!
//! A convention checks the declared interface of a nested graph and reports
//! where its recurrent state lives. The shape checks shared by every
//! convention live in [`crate::Subgraph::get_parameters`].

use std::fmt::Debug;

use kore_core::Result;

use crate::graph::{ElemType, GraphDef, ValueInfo};

/// Layout facts a convention derives from a valid graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubgraphLayout {
    pub num_layers: usize,
    /// Index of the first past-state input.
    pub first_past_input: usize,
    /// Index of the first present-state output.
    pub first_present_output: usize,
    /// Past state is `(2, batch, heads, seq, head_size)` rather than separate
    /// 4-D key and value tensors.
    pub merged_past: bool,
    pub is_output_float16: bool,
}

pub trait SubgraphConvention: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Check the graph's formal inputs and outputs. Implicit inputs are
    /// bound by the caller and never appear in the interface checked here.
    fn validate(&self, graph: &GraphDef) -> Result<SubgraphLayout>;
}

fn expect_name(values: &[ValueInfo], idx: usize, kind: &str, expected: &str) -> Result<()> {
    let got = &values[idx].name;
    kore_core::invalid_if!(
        got != expected,
        "subgraph {kind} {idx} shall be named as {expected}, got: {got}"
    );
    Ok(())
}

fn expect_type(value: &ValueInfo, kind: &str, idx: usize, expected: ElemType) -> Result<()> {
    kore_core::invalid_if!(
        value.elem_type != expected,
        "subgraph {kind} {idx} ({}) shall have {expected} type, got {}",
        value.name,
        value.elem_type
    );
    Ok(())
}

fn float_output_type(logits: &ValueInfo) -> Result<bool> {
    kore_core::invalid_if!(
        !logits.elem_type.is_float(),
        "subgraph output 0 (logits) shall be float32 or float16, got {}",
        logits.elem_type
    );
    Ok(logits.elem_type == ElemType::Float16)
}

fn expect_state_type(values: &[ValueInfo], range: std::ops::Range<usize>, kind: &str, expected: ElemType) -> Result<()> {
    for idx in range {
        kore_core::invalid_if!(
            values[idx].elem_type != expected,
            "subgraph {kind} {idx} ({}) shall have the same type as logits ({expected}), got {}",
            values[idx].name,
            values[idx].elem_type
        );
    }
    Ok(())
}

/// GPT-style decoder: inputs `input_ids, position_ids, attention_mask,
/// past_0..past_{L-1}`, outputs `logits, present_0..present_{L-1}`, with
/// merged 5-D past state.
#[derive(Debug, Clone, Copy, Default)]
pub struct GptConvention;

impl GptConvention {
    const FIRST_PAST_INPUT: usize = 3;
}

impl SubgraphConvention for GptConvention {
    fn name(&self) -> &'static str {
        "gpt"
    }

    fn validate(&self, graph: &GraphDef) -> Result<SubgraphLayout> {
        let (inputs, outputs) = (&graph.inputs, &graph.outputs);
        kore_core::invalid_if!(inputs.len() < 4, "expect 4 inputs or more, got: {}", inputs.len());
        kore_core::invalid_if!(
            outputs.len() < 2,
            "number of outputs shall be larger than 1 (need past state in inputs and outputs), got {}",
            outputs.len()
        );
        kore_core::invalid_if!(
            inputs.len() != outputs.len() + 2,
            "number of inputs shall be number of outputs plus 2, got {} inputs and {} outputs",
            inputs.len(),
            outputs.len()
        );

        for (idx, name) in ["input_ids", "position_ids", "attention_mask"].into_iter().enumerate() {
            expect_name(inputs, idx, "input", name)?;
            expect_type(&inputs[idx], "input", idx, ElemType::Int32)?;
        }
        expect_name(outputs, 0, "output", "logits")?;

        let num_layers = outputs.len() - 1;
        for layer in 0..num_layers {
            expect_name(inputs, Self::FIRST_PAST_INPUT + layer, "input", &format!("past_{layer}"))?;
            expect_name(outputs, 1 + layer, "output", &format!("present_{layer}"))?;
        }

        let is_output_float16 = float_output_type(&outputs[0])?;
        let state_type = outputs[0].elem_type;
        expect_state_type(inputs, Self::FIRST_PAST_INPUT..inputs.len(), "input", state_type)?;
        expect_state_type(outputs, 1..outputs.len(), "output", state_type)?;

        Ok(SubgraphLayout {
            num_layers,
            first_past_input: Self::FIRST_PAST_INPUT,
            first_present_output: 1,
            merged_past: true,
            is_output_float16,
        })
    }
}

/// Encoder-decoder decoder: inputs `input_ids, encoder_attention_mask,
/// encoder_hidden_states`, then `past_key_self_i, past_value_self_i` for each
/// layer followed by `past_key_cross_i, past_value_cross_i` for each layer.
/// Outputs `logits, present_key_self_i, present_value_self_i`. Past state is
/// 4-D `(batch, heads, seq, head_size)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderConvention;

impl DecoderConvention {
    const FIRST_PAST_INPUT: usize = 3;
}

impl SubgraphConvention for DecoderConvention {
    fn name(&self) -> &'static str {
        "decoder"
    }

    fn validate(&self, graph: &GraphDef) -> Result<SubgraphLayout> {
        let (inputs, outputs) = (&graph.inputs, &graph.outputs);
        kore_core::invalid_if!(
            outputs.len() < 3 || outputs.len() % 2 == 0,
            "number of outputs shall be 1 + 2 * num_layers, got {}",
            outputs.len()
        );
        let num_layers = (outputs.len() - 1) / 2;
        let expected_inputs = Self::FIRST_PAST_INPUT + 4 * num_layers;
        kore_core::invalid_if!(
            inputs.len() != expected_inputs,
            "number of inputs expected to be {} + 4 * num_layers = {}, got {}",
            Self::FIRST_PAST_INPUT,
            expected_inputs,
            inputs.len()
        );

        for (idx, name) in ["input_ids", "encoder_attention_mask", "encoder_hidden_states"]
            .into_iter()
            .enumerate()
        {
            expect_name(inputs, idx, "input", name)?;
        }
        expect_type(&inputs[0], "input", 0, ElemType::Int32)?;
        expect_type(&inputs[1], "input", 1, ElemType::Int32)?;
        expect_name(outputs, 0, "output", "logits")?;

        let cross_start = Self::FIRST_PAST_INPUT + 2 * num_layers;
        for layer in 0..num_layers {
            let self_idx = Self::FIRST_PAST_INPUT + 2 * layer;
            expect_name(inputs, self_idx, "input", &format!("past_key_self_{layer}"))?;
            expect_name(inputs, self_idx + 1, "input", &format!("past_value_self_{layer}"))?;
            expect_name(inputs, cross_start + 2 * layer, "input", &format!("past_key_cross_{layer}"))?;
            expect_name(inputs, cross_start + 2 * layer + 1, "input", &format!("past_value_cross_{layer}"))?;
            expect_name(outputs, 1 + 2 * layer, "output", &format!("present_key_self_{layer}"))?;
            expect_name(outputs, 2 + 2 * layer, "output", &format!("present_value_self_{layer}"))?;
        }

        let is_output_float16 = float_output_type(&outputs[0])?;
        let state_type = outputs[0].elem_type;
        expect_type(&inputs[2], "input", 2, state_type)?;
        expect_state_type(inputs, Self::FIRST_PAST_INPUT..inputs.len(), "input", state_type)?;
        expect_state_type(outputs, 1..outputs.len(), "output", state_type)?;

        Ok(SubgraphLayout {
            num_layers,
            first_past_input: Self::FIRST_PAST_INPUT,
            first_present_output: 1,
            merged_past: false,
            is_output_float16,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_core::sym_shape;

    fn value(name: &str, elem_type: ElemType) -> ValueInfo {
        ValueInfo::new(name, elem_type, sym_shape!["batch"])
    }

    fn gpt(num_layers: usize, state: ElemType) -> GraphDef {
        let mut g = GraphDef::new("gpt")
            .with_input(value("input_ids", ElemType::Int32))
            .with_input(value("position_ids", ElemType::Int32))
            .with_input(value("attention_mask", ElemType::Int32))
            .with_output(value("logits", state));
        for i in 0..num_layers {
            g = g
                .with_input(value(&format!("past_{i}"), state))
                .with_output(value(&format!("present_{i}"), state));
        }
        g
    }

    fn decoder(num_layers: usize) -> GraphDef {
        let f = ElemType::Float32;
        let mut g = GraphDef::new("decoder")
            .with_input(value("input_ids", ElemType::Int32))
            .with_input(value("encoder_attention_mask", ElemType::Int32))
            .with_input(value("encoder_hidden_states", f))
            .with_output(value("logits", f));
        for i in 0..num_layers {
            g = g
                .with_input(value(&format!("past_key_self_{i}"), f))
                .with_input(value(&format!("past_value_self_{i}"), f))
                .with_output(value(&format!("present_key_self_{i}"), f))
                .with_output(value(&format!("present_value_self_{i}"), f));
        }
        for i in 0..num_layers {
            g = g
                .with_input(value(&format!("past_key_cross_{i}"), f))
                .with_input(value(&format!("past_value_cross_{i}"), f));
        }
        g
    }

    #[test]
    fn test_gpt_valid() {
        let layout = GptConvention.validate(&gpt(3, ElemType::Float16)).unwrap();
        assert_eq!(layout.num_layers, 3);
        assert!(layout.merged_past);
        assert!(layout.is_output_float16);
        assert_eq!(layout.first_past_input, 3);
    }

    #[test]
    fn test_gpt_counts() {
        let err = GptConvention.validate(&gpt(0, ElemType::Float32)).unwrap_err();
        assert!(err.to_string().contains("expect 4 inputs or more, got: 3"));

        let mut g = gpt(2, ElemType::Float32);
        g.outputs.pop();
        let err = GptConvention.validate(&g).unwrap_err();
        assert!(err.to_string().contains("number of inputs shall be number of outputs plus 2"));
    }

    #[test]
    fn test_gpt_names_and_types() {
        let mut g = gpt(1, ElemType::Float32);
        g.inputs[1].name = "positions".into();
        let err = GptConvention.validate(&g).unwrap_err();
        assert!(err.to_string().contains("subgraph input 1 shall be named as position_ids, got: positions"));

        let mut g = gpt(1, ElemType::Float32);
        g.inputs[0].elem_type = ElemType::Int64;
        let err = GptConvention.validate(&g).unwrap_err();
        assert!(err.to_string().contains("subgraph input 0 (input_ids) shall have int32 type, got int64"));

        let mut g = gpt(2, ElemType::Float32);
        g.inputs[4].elem_type = ElemType::Float16;
        let err = GptConvention.validate(&g).unwrap_err();
        assert!(err.to_string().contains("past_1"));

        let mut g = gpt(1, ElemType::Float32);
        g.outputs[0].elem_type = ElemType::Int32;
        assert!(GptConvention.validate(&g).is_err());
    }

    #[test]
    fn test_decoder_valid() {
        let layout = DecoderConvention.validate(&decoder(2)).unwrap();
        assert_eq!(layout.num_layers, 2);
        assert!(!layout.merged_past);
        assert!(!layout.is_output_float16);
    }

    #[test]
    fn test_decoder_rejects_bad_layout() {
        let mut g = decoder(2);
        g.outputs.pop();
        let err = DecoderConvention.validate(&g).unwrap_err();
        assert!(err.to_string().contains("1 + 2 * num_layers"));

        let mut g = decoder(1);
        g.inputs.pop();
        let err = DecoderConvention.validate(&g).unwrap_err();
        assert!(err.to_string().contains("got 6"));

        let mut g = decoder(1);
        g.inputs.swap(3, 4);
        let err = DecoderConvention.validate(&g).unwrap_err();
        assert!(err.to_string().contains("past_key_self_0"));
    }
}

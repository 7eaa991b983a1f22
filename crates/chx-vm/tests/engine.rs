use anyhow::{anyhow, Context};
use chx_compiler::chxvm::{InstAttr, Opcode};
use chx_compiler::graph::ValueType;
use chx_compiler::ops::{names, OpKind, OpRegistry, OpSchema};
use chx_compiler::{emit, Dtype, EmitOptions, Graph, Program, Tensor};
use chx_vm::{
    bind_inputs, CustomOpOutput, CustomOpRegistry, ExecutionEngine, Inputs, Outputs, RunOptions,
    TraceLevel, Var, VmError,
};

/// Runs `Identity` and `CustomOp` instructions; enough to drive the contract.
struct PassThroughEngine;

impl ExecutionEngine for PassThroughEngine {
    fn name(&self) -> &str {
        "pass-through"
    }

    fn run(&self, program: &Program, inputs: Inputs, options: &RunOptions) -> Result<Outputs, VmError> {
        let mut registers: Vec<Option<Var>> = vec![None; program.num_registers as usize];
        for (register, value) in bind_inputs(program, inputs)? {
            registers[register.0 as usize] = Some(value);
        }
        for inst in &program.instructions {
            let mut args = Vec::with_capacity(inst.inputs.len());
            for register in &inst.inputs {
                let tensor = registers[register.0 as usize]
                    .as_ref()
                    .and_then(Var::as_array)
                    .with_context(|| format!("{register} is not an array"))?;
                args.push(tensor.clone());
            }
            let results = match inst.op {
                Opcode::Identity => args,
                Opcode::CustomOp => {
                    let Some(InstAttr::String(name)) = inst.attr("name") else {
                        return Err(anyhow!("custom op without a name").into());
                    };
                    options.custom_ops.invoke(name, &args)?
                }
                other => return Err(anyhow!("unsupported opcode {other}").into()),
            };
            if options.trace_level.is_enabled() {
                tracing::trace!(op = %inst.op, node = %inst.debug_info, "executed");
            }
            for (register, tensor) in inst.outputs.iter().zip(results) {
                registers[register.0 as usize] = Some(Var::Array(tensor));
            }
        }
        let mut outputs = Outputs::new();
        for (name, register) in &program.outputs {
            let value = registers[register.0 as usize]
                .clone()
                .ok_or_else(|| anyhow!("output {name} was never written"))?;
            outputs.insert(name.clone(), value);
        }
        Ok(outputs)
    }
}

fn doubling_program() -> Program {
    let mut graph = Graph::new("doubling");
    let x = graph
        .add_input_value("x", ValueType::new(Dtype::Float32, &[2]))
        .unwrap();
    let d = graph.add_temp_value("d", ValueType::unknown()).unwrap();
    let y = graph.add_output_value("y", ValueType::unknown()).unwrap();
    graph.add_node("Double", &[x], &[d]).unwrap();
    graph.add_node(names::IDENTITY, &[d], &[y]).unwrap();

    let mut schemas = OpRegistry::new();
    schemas
        .register_custom(OpSchema::new("Double", OpKind::Custom, (1, Some(1))))
        .unwrap();
    emit(&graph, &EmitOptions::default().with_custom_ops(&schemas)).unwrap()
}

fn doubling_ops() -> CustomOpRegistry {
    let mut registry = CustomOpRegistry::new();
    registry
        .register(
            "Double",
            1,
            |inputs: &[Tensor]| -> anyhow::Result<CustomOpOutput> {
                let x = &inputs[0];
                let values = (0..x.num_elements())
                    .map(|i| x.get_f64(i).map(|v| v * 2.0))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CustomOpOutput::Single(Tensor::from_values(
                    "doubled",
                    x.dtype(),
                    x.dims().to_vec(),
                    &values,
                )?))
            },
        )
        .unwrap();
    registry
}

fn input_x() -> Inputs {
    let x = Tensor::from_values("x", Dtype::Float32, vec![2], &[1.5f64, -3.0]).unwrap();
    Inputs::from([("x".to_string(), Var::from(x))])
}

#[test]
fn engine_runs_custom_ops_from_the_options() {
    let program = doubling_program();
    assert_eq!(program.opcodes(), vec![Opcode::CustomOp, Opcode::Identity]);

    let options = RunOptions::default()
        .with_custom_ops(doubling_ops())
        .with_trace_level(TraceLevel::from_flags(true, false));
    let engine = PassThroughEngine;
    let outputs = engine.run(&program, input_x(), &options).unwrap();

    let y = outputs["y"].as_array().unwrap();
    assert_eq!(y.get_f64(0).unwrap(), 3.0);
    assert_eq!(y.get_f64(1).unwrap(), -6.0);
    assert_eq!(engine.name(), "pass-through");
}

#[test]
fn unregistered_custom_op_fails_at_run_time() {
    let program = doubling_program();
    let err = PassThroughEngine
        .run(&program, input_x(), &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, VmError::UnknownCustomOp(name) if name == "Double"));
}

#[test]
fn every_declared_input_must_be_bound() {
    let program = doubling_program();
    let err = bind_inputs(&program, Inputs::new()).unwrap_err();
    assert!(
        matches!(&err, VmError::MissingInput { program, name } if program == "doubling" && name == "x"),
        "{err}"
    );
}

#[test]
fn undeclared_inputs_are_rejected() {
    let program = doubling_program();
    let mut inputs = input_x();
    let extra = Tensor::scalar("z", Dtype::Int64, 1i64).unwrap();
    inputs.insert("z".to_string(), Var::Sequence(vec![Var::from(extra)]));
    let err = bind_inputs(&program, inputs).unwrap_err();
    assert!(matches!(err, VmError::UnexpectedInput { name, .. } if name == "z"));
}

#[test]
fn bound_inputs_follow_register_order() {
    let program = doubling_program();
    let bound = bind_inputs(&program, input_x()).unwrap();
    assert_eq!(bound.len(), 1);
    assert_eq!(bound[0].0, program.inputs[0].1);
    assert!(bound[0].1.as_array().is_some());
}

#[test]
fn run_options_default_to_quiet_inference() {
    let options = RunOptions::default().training(true);
    assert!(options.training);
    assert_eq!(options.trace_level, TraceLevel::Off);
    assert!(!options.check_nans && !options.check_infs && !options.check_types);
    assert!(options.chrome_tracing.is_none());
    assert_eq!(options.custom_ops.names().count(), 0);
}

use chx_compiler::tensor::{Dtype, Tensor, TensorError, TensorRecord};

fn sample(dtype: Dtype) -> Tensor {
    let values: &[f64] = match dtype {
        Dtype::Bool => &[0.0, 1.0, 1.0, 0.0, 1.0, 0.0],
        Dtype::UInt8 => &[0.0, 1.0, 7.0, 128.0, 200.0, 255.0],
        Dtype::Int8 | Dtype::Int16 | Dtype::Int32 | Dtype::Int64 => {
            &[-3.0, -1.0, 0.0, 1.0, 42.0, 100.0]
        }
        Dtype::Float16 | Dtype::Float32 | Dtype::Float64 => &[-2.5, -0.5, 0.0, 0.25, 1.0, 3.75],
    };
    Tensor::from_values(format!("t_{}", dtype.name()), dtype, vec![2, 3], values)
        .unwrap()
        .with_doc_string("sample")
}

#[test]
fn typed_records_round_trip_for_every_dtype() {
    for dtype in Dtype::ALL {
        let tensor = sample(dtype);
        let record = tensor.to_record();
        assert!(record.raw_data.is_none(), "{dtype}");
        let decoded = Tensor::from_record(&record).unwrap();
        assert_eq!(decoded, tensor, "{dtype}");
        assert_eq!(decoded.doc_string(), "sample");
    }
}

#[test]
fn raw_records_round_trip_for_every_dtype() {
    for dtype in Dtype::ALL {
        let tensor = sample(dtype);
        let record = tensor.to_raw_record();
        assert_eq!(record.raw_data.as_deref(), Some(tensor.as_bytes()));
        assert_eq!(Tensor::from_record(&record).unwrap(), tensor, "{dtype}");
    }
}

#[test]
fn element_values_survive_the_typed_encoding() {
    let tensor = sample(Dtype::Int16);
    let decoded = Tensor::from_record(&tensor.to_record()).unwrap();
    assert_eq!(decoded.to_i64_vec().unwrap(), vec![-3, -1, 0, 1, 42, 100]);

    let halves = Tensor::from_record(&sample(Dtype::Float16).to_record()).unwrap();
    assert_eq!(halves.get_f64(5).unwrap(), 3.75);
}

#[test]
fn mixed_encodings_are_rejected() {
    let record = TensorRecord {
        name: "mixed".into(),
        data_type: Dtype::Float32.to_onnx(),
        dims: vec![1],
        raw_data: Some(1.0f32.to_le_bytes().to_vec()),
        float_data: vec![1.0],
        ..TensorRecord::default()
    };
    assert!(matches!(
        Tensor::from_record(&record),
        Err(TensorError::MixedEncoding { field: "float_data", .. })
    ));
}

#[test]
fn typed_field_must_match_dtype() {
    let record = TensorRecord {
        name: "wrong_field".into(),
        data_type: Dtype::Float32.to_onnx(),
        dims: vec![2],
        int64_data: vec![1, 2],
        ..TensorRecord::default()
    };
    assert!(matches!(
        Tensor::from_record(&record),
        Err(TensorError::UnexpectedField {
            field: "int64_data",
            dtype: Dtype::Float32,
            ..
        })
    ));
}

#[test]
fn malformed_records_are_rejected() {
    let negative = TensorRecord {
        name: "neg".into(),
        data_type: Dtype::Int64.to_onnx(),
        dims: vec![2, -1],
        ..TensorRecord::default()
    };
    assert_eq!(
        Tensor::from_record(&negative),
        Err(TensorError::NegativeDim {
            name: "neg".into(),
            dim: -1
        })
    );

    let strings = TensorRecord {
        name: "s".into(),
        data_type: 8,
        dims: vec![1],
        string_data: vec![b"x".to_vec()],
        ..TensorRecord::default()
    };
    assert_eq!(
        Tensor::from_record(&strings),
        Err(TensorError::UnsupportedDtype(8))
    );

    let short = TensorRecord {
        name: "short".into(),
        data_type: Dtype::Float32.to_onnx(),
        dims: vec![3],
        float_data: vec![1.0, 2.0],
        ..TensorRecord::default()
    };
    assert!(matches!(
        Tensor::from_record(&short),
        Err(TensorError::ElementCount {
            expected: 3,
            actual: 2,
            ..
        })
    ));
}

#[test]
fn oversized_dims_report_overflow() {
    let huge = vec![1i64 << 32, 1 << 32, 1 << 32];
    let typed = TensorRecord {
        name: "huge".into(),
        data_type: Dtype::Float32.to_onnx(),
        dims: huge.clone(),
        float_data: vec![1.0],
        ..TensorRecord::default()
    };
    assert_eq!(
        Tensor::from_record(&typed),
        Err(TensorError::Overflow {
            name: "huge".into()
        })
    );

    let raw = TensorRecord {
        name: "huge".into(),
        data_type: Dtype::Float32.to_onnx(),
        dims: huge,
        raw_data: Some(vec![0; 4]),
        ..TensorRecord::default()
    };
    assert!(matches!(
        Tensor::from_record(&raw),
        Err(TensorError::Overflow { .. })
    ));
}

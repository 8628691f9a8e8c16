use nested_core::functional::Pool2dParams;
use nested_core::nn::{BatchNorm2d, MaxPool2d, ReLU};
use nested_core::{DType, Module, Tensor};
use nestedtensor::{
    as_nested_tensor, io, nested_tensor, CreationOptions, NestedItem, NestedModule, NestedNode,
    NestedTensor, NestedTensorError,
};
use tempfile::tempdir;

fn ragged_images() -> Vec<Tensor> {
    vec![
        Tensor::randn(&[3, 8, 6]),
        Tensor::randn(&[3, 4, 10]),
        Tensor::randn(&[3, 6, 6]),
    ]
}

#[test]
fn test_segmentation_style_pipeline() {
    let inputs = ragged_images();
    let nt = nested_tensor(inputs.clone(), &CreationOptions::new()).unwrap();
    assert_eq!(nt.sizes(), vec![Some(3), Some(3), None, None]);

    let activated = ReLU.forward_nested(&nt).unwrap();
    assert!(activated.is_contiguous());
    let pooled = MaxPool2d::new(Pool2dParams::new((2, 2))).forward_nested(&activated).unwrap();
    let expected: Vec<Vec<usize>> = vec![vec![3, 4, 3], vec![3, 2, 5], vec![3, 3, 3]];
    let got: Vec<Vec<usize>> = pooled.components().iter().map(|t| t.dims().to_vec()).collect();
    assert_eq!(got, expected);

    // Looping over the dense inputs gives the same numbers.
    for (dense, nested) in inputs.iter().zip(activated.components()) {
        let reference = ReLU.forward(dense).unwrap();
        assert_eq!(reference.to_f32_vec().unwrap(), nested.to_f32_vec().unwrap());
    }
}

#[test]
fn test_batchnorm_matches_loop() {
    let mut bn = BatchNorm2d::new(3, 1e-5, 0.1);
    bn.eval();
    let inputs = ragged_images();
    let nt = nested_tensor(inputs.clone(), &CreationOptions::new()).unwrap();
    let out = bn.forward_nested(&nt).unwrap();
    for (dense, nested) in inputs.iter().zip(out.components()) {
        let reference = bn
            .forward(&dense.unsqueeze(0).unwrap())
            .unwrap()
            .squeeze(Some(0))
            .unwrap();
        assert!(reference.allclose(nested, 1e-5, 1e-6).unwrap());
    }
}

#[test]
fn test_binary_and_unary_against_flat_tensor() {
    let parts = vec![Tensor::randn(&[120, 16]), Tensor::randn(&[37, 16])];
    let nt = nested_tensor(parts.clone(), &CreationOptions::new()).unwrap();
    let flat = Tensor::cat(&parts, 0).unwrap();

    let product = nt.mul(&nt).unwrap();
    let flat_product = flat.mul(&flat).unwrap();
    assert_eq!(product.buffer().unwrap().to_f32_vec().unwrap(), flat_product.to_f32_vec().unwrap());

    let mut cosined = nt.clone();
    cosined.cos_().unwrap();
    let flat_cos = flat.cos().unwrap();
    assert_eq!(cosined.buffer().unwrap().to_f32_vec().unwrap(), flat_cos.to_f32_vec().unwrap());
    // The input is untouched.
    assert_eq!(nt.components()[0].to_f32_vec().unwrap(), parts[0].to_f32_vec().unwrap());
}

#[test]
fn test_as_nested_tensor_and_options() {
    let nt = nested_tensor(vec![Tensor::ones(&[2, 2])], &CreationOptions::new()).unwrap();
    let reused = as_nested_tensor(nt.clone(), &CreationOptions::new()).unwrap();
    assert!(reused
        .buffer()
        .unwrap()
        .storage_ref()
        .same_allocation(nt.buffer().unwrap().storage_ref()));

    let cast = as_nested_tensor(nt, &CreationOptions::new().dtype(DType::F16)).unwrap();
    assert_eq!(cast.dtype(), DType::F16);
    assert_eq!(cast.element_size(), 2);
}

#[test]
fn test_unbind_and_to_tensor_dim() {
    let nt = nested_tensor(
        vec![
            NestedNode::from_leaves(vec![Tensor::ones(&[2]), Tensor::ones(&[2])]),
            NestedNode::from_leaves(vec![Tensor::ones(&[2]), Tensor::ones(&[2])]),
        ],
        &CreationOptions::new(),
    )
    .unwrap();
    assert_eq!(nt.sizes(), vec![Some(2), Some(2), Some(2)]);
    let dense = nt.to_tensor().unwrap();
    assert_eq!(dense.dims(), &[2, 2, 2]);

    match nt.to_tensor_dim(1).unwrap() {
        NestedItem::Nested(inner) => {
            assert_eq!(inner.nested_dim(), 1);
            assert_eq!(inner.components()[0].dims(), &[2, 2]);
        }
        NestedItem::Tensor(_) => panic!("dim 1 keeps one nested level"),
    }

    let halves = nt.unbind(1).unwrap();
    assert_eq!(halves.len(), 2);
    assert!(halves.iter().all(|h| h.as_nested().map(NestedTensor::len) == Some(2)));
}

#[test]
fn test_irregular_to_tensor_fails() {
    let nt = nested_tensor(ragged_images(), &CreationOptions::new()).unwrap();
    assert!(matches!(nt.to_tensor(), Err(NestedTensorError::IrregularShape { dim: 2 })));
}

#[test]
fn test_save_load_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("batch.safetensors");
    let nt = nested_tensor(ragged_images(), &CreationOptions::new()).unwrap();
    io::save(&path, &nt).unwrap();
    let back = io::load(&path).unwrap();
    assert_eq!(back.nested_size(), nt.nested_size());
    for (a, b) in nt.components().iter().zip(back.components()) {
        assert_eq!(a.to_f32_vec().unwrap(), b.to_f32_vec().unwrap());
    }
    assert!(matches!(io::load(dir.path().join("missing.safetensors")), Err(NestedTensorError::Io(_))));
}

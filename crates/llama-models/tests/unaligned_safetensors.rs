use llama_models::TensorStore;

#[test]
fn load_unaligned_safetensors() {
    // The data section must start at an offset with (8 + header_len) % 4 != 0.
    let header_json = r#"{"test":{"dtype":"F32","shape":[1],"data_offsets":[0,4]}}"#;
    let mut header_bytes = header_json.as_bytes().to_vec();

    let remainder = header_bytes.len() % 4;
    let padding_needed = if remainder <= 1 {
        1 - remainder
    } else {
        1 + 4 - remainder
    };

    // Spaces are valid JSON whitespace.
    header_bytes.extend(std::iter::repeat_n(b' ', padding_needed));

    let header_len = header_bytes.len();
    assert_eq!(
        (8 + header_len) % 4,
        1,
        "Header should end at unaligned offset"
    );

    let mut file_bytes = Vec::new();
    file_bytes.extend_from_slice(&(header_len as u64).to_le_bytes());
    file_bytes.extend_from_slice(&header_bytes);
    let data: f32 = 123.456;
    file_bytes.extend_from_slice(&data.to_le_bytes());

    let store = TensorStore::from_bytes(&file_bytes).expect("unaligned data must load");
    let tensor = store.get("test").unwrap();
    assert_eq!(tensor.shape, vec![1]);
    assert_eq!(tensor.data[0], 123.456);
}

#[test]
fn load_unaligned_from_mapped_file() {
    let header_json = br#"{"w":{"dtype":"F32","shape":[2],"data_offsets":[0,8]}} "#;
    let mut file_bytes = (header_json.len() as u64).to_le_bytes().to_vec();
    file_bytes.extend_from_slice(header_json);
    for v in [1.5f32, -2.25] {
        file_bytes.extend_from_slice(&v.to_le_bytes());
    }
    assert_ne!((8 + header_json.len()) % 4, 0);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unaligned.safetensors");
    std::fs::write(&path, &file_bytes).unwrap();

    let store = TensorStore::open(&path).unwrap();
    assert_eq!(store.get("w").unwrap().data, vec![1.5, -2.25]);
}

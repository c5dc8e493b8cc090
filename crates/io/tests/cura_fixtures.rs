// Loads a small printer profile from fixture files and resolves it end to end.

use std::fs;
use std::path::{Path, PathBuf};

use profilestack_engine::provenance::ProvenanceIndex;
use profilestack_engine::*;
use profilestack_io::*;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn document_source() -> TextSource {
    let mut source = TextSource::new();
    for dir in ["definitions", "containers"] {
        for entry in fs::read_dir(fixtures_dir().join(dir)).unwrap() {
            let path = entry.unwrap().path();
            let file_name = path.file_name().unwrap().to_str().unwrap().to_string();
            let text = fs::read_to_string(&path).unwrap();
            assert!(source.insert_file(&file_name, text), "unexpected fixture {}", file_name);
        }
    }
    source
}

fn stack_file(file_name: &str) -> StackFile {
    let text = fs::read_to_string(fixtures_dir().join("stacks").join(file_name)).unwrap();
    let id = file_name
        .strip_suffix(GLOBAL_STACK_SUFFIX)
        .or_else(|| file_name.strip_suffix(EXTRUDER_STACK_SUFFIX))
        .unwrap();
    parse_stack(id, &text).unwrap()
}

fn stack_spec() -> StackSpec {
    let global = stack_file("My Ender.global.cfg");
    let extruders = vec![stack_file("My Ender_extruder_0.extruder.cfg")];
    assemble_stack(&global, &extruders).unwrap()
}

fn resolve_fixture() -> Resolution {
    let graph = DefinitionGraph::new(document_source());
    let stack = LayerStack::build(&stack_spec(), &graph).unwrap();
    resolve_all(&stack, &ResolveOptions::default()).unwrap()
}

#[test]
fn stack_files_assemble_into_spec() {
    let spec = stack_spec();
    assert_eq!(spec.base(), Some("creality_ender3pro"));
    assert_eq!(
        spec.layers.keys().copied().collect::<Vec<_>>(),
        vec![
            Category::Definition,
            Category::DefinitionChanges,
            Category::Quality,
            Category::User
        ]
    );
    let inner = &spec.extruders[&0];
    assert_eq!(inner.get(&Category::Material).map(String::as_str), Some("generic_pla"));
    assert_eq!(inner.get(&Category::Variant).map(String::as_str), Some("nozzle_06"));
    assert!(!inner.contains_key(&Category::Definition));
}

#[test]
fn source_lists_documents_by_category() {
    let source = document_source();
    assert_eq!(source.list_documents(Category::Quality), vec!["creality_base_standard"]);
    assert_eq!(source.list_documents(Category::Material), vec!["generic_pla"]);
    assert_eq!(source.list_documents(Category::Definition).len(), 5);
}

#[test]
fn inheritance_chain_from_files() {
    let graph = DefinitionGraph::new(document_source());
    assert_eq!(
        graph.inheritance_chain("creality_ender3pro").unwrap(),
        vec!["creality_ender3pro", "creality_base", "fdmprinter"]
    );
    let expanded = graph.resolve("creality_ender3pro").unwrap();
    assert!(expanded.defines("layer_height"));
    assert!(expanded.defines("machine_width"));
}

#[test]
fn inheritance_loop_in_files() {
    let graph = DefinitionGraph::new(document_source());
    assert!(matches!(
        graph.resolve("loop_a"),
        Err(ResolveError::InheritanceCycle { members }) if members.len() == 2
    ));
}

#[test]
fn global_values() {
    let resolution = resolve_fixture();

    let quality = resolution.get("layer_height").unwrap();
    assert_eq!(quality.value, Value::Float(0.16));
    assert_eq!(
        quality.source.as_ref().map(|s| (s.category, s.document.as_str())),
        Some((Category::Quality, "creality_base_standard"))
    );

    let width = resolution.get("machine_width").unwrap();
    assert_eq!(width.value, Value::Float(220.0));
    assert_eq!(width.source.as_ref().map(|s| s.document.as_str()), Some("creality_ender3pro"));
    assert_eq!(width.chain.len(), 2);

    let bed = resolution.get("machine_heated_bed").unwrap();
    assert_eq!(bed.value, Value::Bool(false));
    assert_eq!(bed.source.as_ref().map(|s| s.category), Some(Category::DefinitionChanges));
    let trail: Vec<&str> = bed.chain.iter().map(|c| c.document.as_str()).collect();
    assert_eq!(trail, vec!["fdmprinter", "creality_base", "My Ender_settings"]);

    assert_eq!(resolution.value("layer_height_0"), Some(&Value::Float(0.2)));
    assert_eq!(resolution.value("retraction_amount"), Some(&Value::Float(5.0)));
    assert_eq!(resolution.value("adhesion_type"), Some(&Value::Text("skirt".into())));
    assert_eq!(resolution.value("wall_line_count"), Some(&Value::Int(2)));
    assert_eq!(resolution.value("support_enable"), Some(&Value::Bool(true)));
    assert!(resolution.get("support_angle").unwrap().enabled);
}

#[test]
fn multi_line_gcode_keeps_blank_lines() {
    let resolution = resolve_fixture();
    let gcode = resolution.get("machine_start_gcode").unwrap();
    assert_eq!(
        gcode.value,
        Value::Text(
            "; Ender-3 Pro start\nG28 ; home all axes\nM104 S{material_print_temperature_layer_0}\n\nG1 Z2.0 F3000\n\nG1 X0.1 Y20 Z0.3 F5000.0"
                .into()
        )
    );
    assert_eq!(gcode.source.as_ref().map(|s| s.category), Some(Category::DefinitionChanges));
    assert!(resolution.errors_for("machine_start_gcode").next().is_none());
}

#[test]
fn quality_changes_outrank_intent() {
    let mut source = document_source();
    source.insert_file(
        "my_qc.inst.cfg",
        "[general]\nname = Mine\n\n[metadata]\ntype = quality_changes\n\n[values]\nlayer_height = 0.1\n",
    );
    source.insert_file(
        "my_intent.inst.cfg",
        "[general]\nname = Engineering\n\n[metadata]\ntype = intent\n\n[values]\nlayer_height = 0.3\nspeed_print = 45\n",
    );
    let global = parse_stack(
        "Tuned Ender",
        "[general]\nid = Tuned Ender\n\n[metadata]\ntype = machine\n\n[containers]\n0 = empty_user\n1 = my_qc\n2 = my_intent\n3 = creality_base_standard\n7 = creality_ender3pro\n",
    )
    .unwrap();
    let spec = assemble_stack(&global, &[]).unwrap();

    let graph = DefinitionGraph::new(source);
    let stack = LayerStack::build(&spec, &graph).unwrap();
    let resolution = resolve_all(&stack, &ResolveOptions::default()).unwrap();

    let layer_height = resolution.get("layer_height").unwrap();
    assert_eq!(layer_height.value, Value::Float(0.1));
    assert_eq!(
        layer_height.source.as_ref().map(|s| (s.category, s.document.as_str())),
        Some((Category::QualityChanges, "my_qc"))
    );
    let trail: Vec<Category> = layer_height.chain.iter().map(|c| c.category).collect();
    assert_eq!(
        trail,
        vec![Category::Definition, Category::Quality, Category::Intent, Category::QualityChanges]
    );

    // Intent still beats quality for keys quality_changes leaves alone
    assert_eq!(resolution.value("speed_print"), Some(&Value::Float(45.0)));
}

#[test]
fn quality_formula_reads_definition_speed() {
    let resolution = resolve_fixture();
    let setting = resolution.get("speed_wall_0").unwrap();
    assert_eq!(setting.value, Value::Float(40.0));
    assert_eq!(setting.chain.last().map(|c| c.raw.source_text()), Some("=speed_print * 0.8".to_string()));

    let dep = &setting.dependencies[0];
    assert_eq!(dep.key, "speed_print");
    assert_eq!(dep.value, Value::Float(50.0));
    assert_eq!(dep.source.as_ref().map(|s| s.document.as_str()), Some("creality_base"));
}

#[test]
fn extruder_layers_apply_per_extruder() {
    let resolution = resolve_fixture();
    let extruder = &resolution.extruders[&0];

    let nozzle = &extruder["machine_nozzle_size"];
    assert_eq!(nozzle.value, Value::Float(0.6));
    assert_eq!(nozzle.source.as_ref().map(|s| s.context), Some(Context::Extruder(0)));

    assert_eq!(extruder["line_width"].value, Value::Float(0.6));
    assert_eq!(extruder["wall_line_count"].value, Value::Int(1));
    assert_eq!(extruder["material_print_temperature"].value, Value::Float(200.0));
    assert_eq!(resolution.value("material_print_temperature"), Some(&Value::Float(210.0)));

    let speed = &extruder["speed_wall_0"];
    assert_eq!(speed.value, Value::Float(40.0));
    assert_eq!(speed.dependencies[0].context, Context::Extruder(0));
    assert_eq!(
        speed.dependencies[0].source.as_ref().map(|s| s.category),
        Some(Category::Material)
    );

    // Global-only keys have no per-extruder entry
    assert!(!extruder.contains_key("layer_height"));
}

#[test]
fn hand_typed_values_are_reported_not_fatal() {
    let resolution = resolve_fixture();

    assert!(resolution.errors_for("infill_sparse_density").any(|e| matches!(
        &e.kind,
        SettingErrorKind::TypeMismatch { expected: SettingType::Float, found } if found == "str 'adaptive'"
    )));
    assert!(resolution.errors_for("retraction_speed").any(|e| e.kind
        == SettingErrorKind::UnknownKey {
            category: Category::User,
            document: "My Ender_user".into()
        }));
    assert!(resolution.get("retraction_speed").is_none());
}

#[test]
fn summary_names_manufacturer() {
    let resolution = resolve_fixture();
    let index = ProvenanceIndex::new(&resolution);
    let summary = index.summary(&KNOWN_MANUFACTURERS);
    assert_eq!(summary.manufacturer.as_deref(), Some("creality"));
    assert_eq!(summary.inheritance, "creality_ender3pro → creality_base → fdmprinter");
    assert_eq!(summary.extruder_count, 1);

    let picked = index.key_settings(&["layer_height", "speed_print", "cool_fan_speed"]);
    assert_eq!(picked.len(), 2);
    assert_eq!(picked["speed_print"].value, &Value::Float(50.0));
}

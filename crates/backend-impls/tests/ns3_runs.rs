use backend_impls::Ns3Backend;
use cellflow_core::{layouts, run, TrafficClass};

#[test]
#[ignore = "ns-3 needs to be compiled"]
fn ns3_runs() -> anyhow::Result<()> {
    const MANIFEST_DIR: &str = env!("CARGO_MANIFEST_DIR");
    let data_dir = tempfile::tempdir()?;
    let mut backend = Ns3Backend::builder()
        .ns3_dir(format!("{MANIFEST_DIR}/../../backends/ns-3-dev"))
        .data_dir(data_dir.path())
        .build();
    let report = run(layouts::multi_cell(1, 60.0, 50.0), &mut backend)?;
    for class in TrafficClass::ALL {
        assert_eq!(report.entries_of(class).count(), 1);
    }
    Ok(())
}

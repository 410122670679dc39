use std::io::Write;
use std::sync::Arc;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use tabular_widedeep::{
    Objective, Settings, StreamTrainer, StreamTrainerConfig, TabTransformerConfig,
    TabularPreprocessor, WideDeep,
};

type Backend = Autodiff<NdArray<f32>>;

const DEMO_ROWS: usize = 500;

fn main() -> tabular_widedeep::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::new().unwrap_or_else(|err| {
        log::warn!("falling back to default settings: {err}");
        Settings::default()
    });
    log::info!("settings: {settings:?}");

    let (path, targets) = write_demo_source()?;
    let mut preprocessor = TabularPreprocessor::new()
        .categorical("color", Vec::<String>::new())
        .categorical("shape", Vec::<String>::new())
        .continuous("size");
    preprocessor.fit(&path)?;

    let config = TabTransformerConfig::new(preprocessor.column_index()?, preprocessor.embed_input())
        .with_continuous_cols(Some(preprocessor.continuous_cols()))
        .with_input_dim(16)
        .with_n_heads(4)
        .with_n_blocks(2)
        .with_ff_hidden_dim(32)
        .with_seed(settings.training.seed);

    let device = Default::default();
    let deep = config.init::<Backend>(&device)?;
    let model = WideDeep::new(None, deep, 1, settings.training.seed, &device)?;

    let trainer_config = StreamTrainerConfig::from_settings(Objective::Regression, &settings.training)
        .with_prefetch(settings.stream.prefetch);
    let mut trainer = StreamTrainer::new(model, trainer_config, &device)?;
    let history = trainer.fit(
        &path,
        &targets,
        Arc::new(preprocessor),
        settings.stream.batch_size,
        settings.training.n_epochs,
        settings.stream.chunk_size,
    )?;

    log::info!(
        "finished {} updates, epoch losses {:?}",
        history.n_updates,
        history.epoch_losses()
    );
    std::fs::remove_file(&path)?;
    Ok(())
}

/// Write a small synthetic regression source and return its path and targets.
fn write_demo_source() -> tabular_widedeep::Result<(std::path::PathBuf, Vec<f32>)> {
    let path = std::env::temp_dir().join(format!("widedeep-demo-{}.csv", std::process::id()));
    let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
    writeln!(file, "color,shape,size")?;

    let colors = ["red", "green", "blue"];
    let shapes = ["circle", "square"];
    let mut targets = Vec::with_capacity(DEMO_ROWS);
    for i in 0..DEMO_ROWS {
        let color = i % colors.len();
        let shape = (i / 3) % shapes.len();
        let size = (i % 11) as f32 / 10.0;
        writeln!(file, "{},{},{}", colors[color], shapes[shape], size)?;
        targets.push(color as f32 * 0.5 - shape as f32 + size);
    }
    file.flush()?;
    Ok((path, targets))
}

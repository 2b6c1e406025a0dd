use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use comfy_table::{
    CellAlignment, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_FULL,
};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use sae_loaders::{
    ArtifactFetcher, Device, HubFetcher, LocalFetcher, SaeConfig, TensorMap,
    loader_for,
};

pub struct LoadRequest {
    pub loader: String,
    pub repo_id: String,
    pub source_path: String,
    pub device: Option<Device>,
    pub force_download: bool,
    pub local_dir: Option<PathBuf>,
    pub json: bool,
}

pub fn handle_load(request: LoadRequest) -> anyhow::Result<()> {
    let loader = loader_for(&request.loader)?;
    let fetcher: Box<dyn ArtifactFetcher> = match &request.local_dir {
        Some(local_dir) => Box::new(LocalFetcher::new(local_dir)),
        None => Box::new(
            HubFetcher::from_env().context("Failed to set up the hub client")?,
        ),
    };

    let progress_bar = ProgressBar::new_spinner();
    progress_bar.enable_steady_tick(Duration::from_millis(100));
    progress_bar.set_style(
        ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?,
    );
    progress_bar.set_message(format!(
        "Loading {}/{} with {}",
        request.repo_id, request.source_path, request.loader
    ));

    let result = loader.load(
        fetcher.as_ref(),
        &request.repo_id,
        &request.source_path,
        request.device,
        request.force_download,
    );
    progress_bar.finish_and_clear();
    let (config, tensors) = result.with_context(|| {
        format!("Failed to load {}/{}", request.repo_id, request.source_path)
    })?;

    if request.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    print_config(&config);
    println!();
    println!("{}", tensor_table(&tensors));
    Ok(())
}

fn print_config(config: &SaeConfig) {
    let style_key = Style::new().bold();
    for (key, value) in config.iter() {
        println!("{}: {}", style_key.apply_to(key), value);
    }
}

/// Name, dtype, shape and device of every tensor, sorted by name.
pub fn tensor_rows(tensors: &TensorMap) -> Vec<[String; 4]> {
    let mut rows: Vec<[String; 4]> = tensors
        .iter()
        .map(|(name, array)| {
            [
                name.clone(),
                format!("{:?}", array.data_type()),
                format!("{:?}", array.shape()),
                array.device().to_string(),
            ]
        })
        .collect();
    rows.sort_by(|a, b| a[0].cmp(&b[0]));
    rows
}

fn tensor_table(tensors: &TensorMap) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Tensor", "DType", "Shape", "Device"]);
    for row in tensor_rows(tensors) {
        table.add_row(row.to_vec());
    }
    if let Some(column) = table.column_mut(2) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    table
}

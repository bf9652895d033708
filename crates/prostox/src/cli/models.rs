//! The `prostox models` command: the supported model catalogue.

use prostox_core::ModelId;

pub fn execute() -> anyhow::Result<()> {
    println!("{}", render_catalogue());
    Ok(())
}

fn render_catalogue() -> String {
    let mut lines = vec![format!(
        "{:<20} {:<20} {:<10} {}",
        "ID", "NAME", "PROVIDER", "API MODEL"
    )];
    for model in ModelId::ALL {
        lines.push(format!(
            "{:<20} {:<20} {:<10} {}",
            model.as_str(),
            model.display_name(),
            model.provider().to_string(),
            model.api_model()
        ));
    }
    lines.join("\n")
}

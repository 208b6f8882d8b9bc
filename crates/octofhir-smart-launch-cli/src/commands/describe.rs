use anyhow::Result;
use colored::Colorize;
use octofhir_smart_launch::AuthenticatorDescriptor;

use crate::cli::OutputFormat;
use crate::output::{print_field, print_json, render_table};

pub fn run(format: OutputFormat) -> Result<()> {
    let descriptor = AuthenticatorDescriptor::smart_ehr_launch();

    if format == OutputFormat::Json {
        return print_json(&descriptor);
    }

    println!("{}", descriptor.display_type.bold());
    println!("{}", descriptor.help_text);
    println!();
    print_field("Provider", Some(descriptor.id));
    let choices = descriptor
        .requirement_choices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    print_field("Requirements", Some(&choices));
    print_field("Configurable", Some(&descriptor.configurable.to_string()));
    print_field(
        "User setup allowed",
        Some(&descriptor.user_setup_allowed.to_string()),
    );
    println!();

    let rows = descriptor
        .properties
        .iter()
        .map(|p| {
            [
                p.name.to_string(),
                format!("{:?}", p.property_type),
                p.default_value.unwrap_or("-").to_string(),
                p.help_text.to_string(),
            ]
        })
        .collect();
    println!(
        "{}",
        render_table(["Property", "Type", "Default", "Description"], rows)
    );

    Ok(())
}

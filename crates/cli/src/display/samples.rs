use flowbridge_core::Sample;

pub fn format_sample(sample: &Sample) -> String {
    let tags = sample
        .tags
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{} [{}] {} {{{}}}",
        sample.metric.name, sample.metric.kind, sample.value, tags
    )
}

/// Samples go to stderr so stdout stays a single JSON document.
pub fn print_samples(samples: &[Sample]) {
    eprintln!("📊 Samples ({}):", samples.len());
    for sample in samples {
        eprintln!("   • {}", format_sample(sample));
    }
}

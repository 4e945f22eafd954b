//! The experiment-control stream: activity labels marked by the operator.

use hermesproto::{DataType, StreamDescriptor};

pub const EXPERIMENT_DEVICE: &str = "experiment";
pub const ACTIVITY_STREAM: &str = "activity";

/// Byte width of an activity label.
pub const ACTIVITY_WIDTH: usize = hermesconf::ACTIVITY_LABEL_WIDTH;

/// Descriptor of `experiment/activity`: one `S26` label per event, aperiodic.
pub fn activity_descriptor(activities: &[String]) -> StreamDescriptor {
    let listing = activities
        .iter()
        .enumerate()
        .map(|(i, label)| format!("{}: {}", i, label))
        .collect::<Vec<_>>()
        .join(", ");
    let range = match activities.len() {
        0 => "no activities configured".to_string(),
        n => format!("index range 0..={}", n - 1),
    };

    StreamDescriptor::new(
        EXPERIMENT_DEVICE,
        ACTIVITY_STREAM,
        DataType::Text(ACTIVITY_WIDTH),
        vec![1],
        0.0,
    )
    .with_note(
        "Description",
        format!(
            "Activity marked by the operator, one of [{}] ({})",
            listing, range
        ),
    )
}

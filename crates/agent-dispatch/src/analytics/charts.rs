//! Render Plotly figure JSON into embeddable markup.

use serde_json::{json, Value};

pub const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

/// Disable fixed sizing and standardize margins.
pub fn normalize_layout(figure: &mut Value) {
    let Some(object) = figure.as_object_mut() else {
        return;
    };
    let layout = object.entry("layout").or_insert_with(|| json!({}));
    if !layout.is_object() {
        *layout = json!({});
    }
    if let Some(layout) = layout.as_object_mut() {
        layout.insert("autosize".to_string(), Value::Bool(true));
        layout.remove("width");
        layout.remove("height");
        layout.insert("margin".to_string(), json!({"l": 10, "r": 10, "t": 40, "b": 20}));
    }
}

/// Markup for every figure of one turn. The Plotly runtime script tag is
/// emitted once, ahead of the first chart.
pub fn render_figures(figures: &[Value]) -> String {
    let batch = uuid::Uuid::new_v4().simple().to_string();
    figures
        .iter()
        .enumerate()
        .map(|(i, figure)| {
            let mut figure = figure.clone();
            normalize_layout(&mut figure);
            let div_id = format!("chart-{}-{}", &batch[..8], i);
            let chart = render_one(&div_id, &figure);
            if i == 0 {
                format!(
                    "<script src=\"{}\" charset=\"utf-8\"></script>\n{}",
                    PLOTLY_CDN, chart
                )
            } else {
                chart
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_one(div_id: &str, figure: &Value) -> String {
    let data = figure.get("data").cloned().unwrap_or_else(|| json!([]));
    let layout = figure.get("layout").cloned().unwrap_or_else(|| json!({}));
    format!(
        "<div id=\"{id}\" class=\"plotly-graph-div\" style=\"height:100%; width:100%;\"></div>\n\
         <script type=\"text/javascript\">Plotly.newPlot(\"{id}\", {data}, {layout}, {{\"responsive\": true}})</script>",
        id = div_id,
        data = script_safe(&data),
        layout = script_safe(&layout),
    )
}

/// JSON that cannot terminate the surrounding script element.
fn script_safe(value: &Value) -> String {
    value.to_string().replace("</", "<\\/")
}

use serde_json::{Value, json};

use super::format_timestamp;
use crate::color::generate_palette;
use crate::data::model::PredictionRecord;
use crate::error::EmitError;

/// plotly.js is linked, not embedded; the page needs network access to draw.
const PLOTLY_JS: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

/// Turns prediction records into a persisted chart.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, title: &str, records: &[PredictionRecord]) -> Result<Vec<u8>, EmitError>;

    /// File extension of the rendered artifact, without the dot.
    fn extension(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Plotly HTML (file mode)
// ---------------------------------------------------------------------------

/// Standalone HTML page drawing Actual and Predicted as lines with markers
/// over a date axis.
#[derive(Debug, Default, Clone)]
pub struct PlotlyHtml;

impl PlotlyHtml {
    /// The Plotly figure (`data` + `layout`) for the records.
    pub fn figure(&self, title: &str, records: &[PredictionRecord]) -> Value {
        let x: Vec<Value> = records
            .iter()
            .map(|r| match r.index {
                Some(t) => Value::String(format_timestamp(&t, false)),
                None => Value::Null,
            })
            .collect();
        let colors = generate_palette(2);

        let trace = |name: &str, y: Vec<f64>, color: &str| {
            json!({
                "type": "scatter",
                "mode": "lines+markers",
                "name": name,
                "x": x,
                "y": y,
                "line": { "color": color },
                "marker": { "color": color, "size": 5 },
            })
        };

        json!({
            "data": [
                trace("Actual", records.iter().map(|r| r.actual).collect(), &colors[0]),
                trace("Predicted", records.iter().map(|r| r.predicted).collect(), &colors[1]),
            ],
            "layout": {
                "title": { "text": title },
                "paper_bgcolor": "white",
                "plot_bgcolor": "white",
                "xaxis": {
                    "title": { "text": "Date" },
                    "type": "date",
                    "gridcolor": "#ebf0f8",
                },
                "yaxis": {
                    "title": { "text": "Values" },
                    "gridcolor": "#ebf0f8",
                },
                "legend": { "title": { "text": "variable" } },
            },
        })
    }
}

impl ChartRenderer for PlotlyHtml {
    fn render(&self, title: &str, records: &[PredictionRecord]) -> Result<Vec<u8>, EmitError> {
        let figure = serde_json::to_string(&self.figure(title, records))?;
        // Keep the JSON from closing the surrounding <script> element.
        let figure = figure.replace("</", "<\\/");

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{PLOTLY_JS}"></script>
</head>
<body>
<div id="chart" style="width:100%;height:95vh;"></div>
<script>
const figure = {figure};
Plotly.newPlot("chart", figure.data, figure.layout, {{ responsive: true }});
</script>
</body>
</html>
"#,
            title = escape_html(title),
        );
        Ok(html.into_bytes())
    }

    fn extension(&self) -> &'static str {
        "html"
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

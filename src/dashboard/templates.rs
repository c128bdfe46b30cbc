use askama::Template;

use crate::config::AppConfig;

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate<'a> {
    pub plotly_js_url: &'a str,
    pub titles: &'a [String],
}

pub fn render_index(config: &AppConfig, titles: &[String]) -> axum::response::Html<String> {
    let template = IndexTemplate {
        plotly_js_url: &config.plotly_js_url,
        titles,
    };
    axum::response::Html(template.render().unwrap_or_else(|e| {
        let msg = e
            .to_string()
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        format!("<h1>Template error: {}</h1>", msg)
    }))
}

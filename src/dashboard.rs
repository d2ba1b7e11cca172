//! HTML status page.

use chrono::Utc;
use handlebars::Handlebars;
use serde_json::json;

use crate::error::CacheWardenError;
use crate::scheduler::ServerStatus;

const STATUS_PAGE: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Cachewarden</title>
<style>
body { font-family: sans-serif; margin: 2em; }
table { border-collapse: collapse; }
td, th { padding: 0.3em 0.8em; border-bottom: 1px solid #ddd; text-align: left; }
.loaded { color: #1a7f37; }
.missing { color: #cf222e; }
</style>
</head>
<body>
<h1>ComfyUI cache status</h1>
<p>Scheduler: {{#if busy}}fleet pass running{{else}}idle{{/if}}. Checked at {{checked_at}}.</p>
<table>
<tr><th>#</th><th>Server</th><th>Cache</th><th>Job in flight</th><th></th></tr>
{{#each servers}}
<tr>
<td>{{index}}</td>
<td title="{{url}}">{{label}}</td>
{{#if cache_loaded}}<td class="loaded">loaded</td>{{else}}<td class="missing">missing</td>{{/if}}
<td>{{#if in_flight}}yes{{else}}no{{/if}}</td>
<td><form method="post" action="/check/{{index}}"><button>Check</button></form></td>
</tr>
{{/each}}
</table>
<form method="post" action="/check/all"><button>Check all servers</button></form>
</body>
</html>
"#;

pub struct Dashboard {
    registry: Handlebars<'static>,
}

impl Dashboard {
    pub fn new() -> Result<Self, CacheWardenError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_template_string("status", STATUS_PAGE)?;
        Ok(Self { registry })
    }

    pub fn render(&self, statuses: &[ServerStatus], busy: bool) -> Result<String, CacheWardenError> {
        let servers: Vec<_> = statuses
            .iter()
            .map(|status| {
                json!({
                    "index": status.index,
                    "url": status.server.url,
                    "label": status.server.label(),
                    "cache_loaded": status.cache_loaded,
                    "in_flight": status.in_flight,
                })
            })
            .collect();
        let context = json!({
            "busy": busy,
            "checked_at": Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            "servers": servers,
        });
        Ok(self.registry.render("status", &context)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;

    #[test]
    fn test_render_lists_servers() {
        let dashboard = Dashboard::new().unwrap();
        let statuses = vec![
            ServerStatus {
                index: 0,
                server: Server::new("http://a:8188").unwrap().with_name("gpu-<a>"),
                cache_loaded: true,
                in_flight: false,
            },
            ServerStatus {
                index: 1,
                server: Server::new("http://b:8188").unwrap(),
                cache_loaded: false,
                in_flight: true,
            },
        ];
        let html = dashboard.render(&statuses, true).unwrap();
        assert!(html.contains("fleet pass running"));
        assert!(html.contains(r#"action="/check/1""#));
        assert!(html.contains(r#"<td class="missing">missing</td>"#));
        // Labels are HTML-escaped.
        assert!(html.contains("gpu-&lt;a&gt;"));
    }

    #[test]
    fn test_render_empty_fleet() {
        let html = Dashboard::new().unwrap().render(&[], false).unwrap();
        assert!(html.contains("idle"));
    }
}

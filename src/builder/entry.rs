//! Application entry module generation.
//!
//! The entry module embeds every page's raw source as a string constant,
//! imports every block, and dispatches requests over a fixed routing
//! table: one `GET` route per page, and `GET`/`POST` routes per block.
//! Pages and blocks arrive sorted from discovery, so the generated text is
//! stable across runs.

use std::fmt;
use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::core::discovery::{DiscoveredBlock, DiscoveredPage, RenderMode};
use crate::util::fs::{relative_path, slash_path};

/// File name of the generated entry module.
pub const ENTRY_FILE: &str = "entry.js";

/// Prefix for block routes.
pub const BLOCK_ROUTE_PREFIX: &str = "/components/";

/// HTTP method of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// What a route serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum RouteTarget {
    Page(String),
    Block(String),
}

/// One entry in the routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub target: RouteTarget,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method.as_str(), self.path)
    }
}

/// Build the routing table for the discovered artifacts.
pub fn routes(pages: &[DiscoveredPage], blocks: &[DiscoveredBlock]) -> Vec<Route> {
    let mut routes = Vec::with_capacity(pages.len() + blocks.len() * 2);

    for page in pages {
        routes.push(Route {
            method: Method::Get,
            path: page.route.clone(),
            target: RouteTarget::Page(page.route.clone()),
        });
    }

    for block in blocks {
        let path = format!("{}{}", BLOCK_ROUTE_PREFIX, block.id);
        for method in [Method::Get, Method::Post] {
            routes.push(Route {
                method,
                path: path.clone(),
                target: RouteTarget::Block(block.id.clone()),
            });
        }
    }

    routes
}

/// JSON string literal, which is also a valid JS string literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Render the entry module.
///
/// Block imports are relative to `build_dir`, where the module is written.
pub fn generate_entry(
    build_dir: &Path,
    pages: &[DiscoveredPage],
    blocks: &[DiscoveredBlock],
    routes: &[Route],
) -> String {
    let mut out = String::new();
    out.push_str("// Generated by hands. Do not edit.\n\n");

    for (index, block) in blocks.iter().enumerate() {
        let mut import = slash_path(&relative_path(build_dir, &block.path));
        if !import.starts_with('.') {
            import.insert_str(0, "./");
        }
        writeln!(out, "import * as block_{} from {};", index, js_string(&import)).unwrap();
    }
    if !blocks.is_empty() {
        out.push('\n');
    }

    out.push_str("const PAGES = {\n");
    for page in pages {
        let title = page
            .title
            .as_deref()
            .map(js_string)
            .unwrap_or_else(|| "null".to_string());
        writeln!(
            out,
            "  {}: {{ title: {}, source: {} }},",
            js_string(&page.route),
            title,
            js_string(&page.source)
        )
        .unwrap();
    }
    out.push_str("};\n\n");

    out.push_str("const BLOCKS = {\n");
    for (index, block) in blocks.iter().enumerate() {
        writeln!(
            out,
            "  {}: {{ module: block_{}, render: {} }},",
            js_string(&block.id),
            index,
            js_string(match block.render {
                RenderMode::Server => "server",
                RenderMode::Client => "client",
            })
        )
        .unwrap();
    }
    out.push_str("};\n\n");

    out.push_str("export const ROUTES = [\n");
    for route in routes {
        writeln!(
            out,
            "  [{}, {}],",
            js_string(route.method.as_str()),
            js_string(&route.path)
        )
        .unwrap();
    }
    out.push_str("];\n\n");

    out.push_str(RUNTIME);
    out
}

const RUNTIME: &str = r#"const BLOCK_PREFIX = "/components/";

function json(value, status = 200) {
  return new Response(JSON.stringify(value), {
    status,
    headers: { "content-type": "application/json; charset=utf-8" },
  });
}

async function serveBlock(request, env, ctx, id) {
  const block = BLOCKS[id];
  if (!block) return json({ error: `unknown block: ${id}` }, 404);
  const mod = block.module;
  const handler =
    request.method === "POST" ? mod.action ?? mod.POST : mod.GET ?? mod.default;
  if (typeof handler !== "function") {
    return json({ error: `block ${id} does not handle ${request.method}` }, 405);
  }
  const props = request.method === "POST" ? await request.json().catch(() => ({})) : {};
  const result = await handler(props, { request, env, ctx });
  return result instanceof Response ? result : json(result ?? null);
}

export default {
  async fetch(request, env, ctx) {
    const url = new URL(request.url);
    if (url.pathname.startsWith(BLOCK_PREFIX)) {
      if (request.method !== "GET" && request.method !== "POST") {
        return json({ error: "method not allowed" }, 405);
      }
      return serveBlock(request, env, ctx, url.pathname.slice(BLOCK_PREFIX.length));
    }
    if (request.method !== "GET") return json({ error: "method not allowed" }, 405);
    const route = url.pathname.replace(/^\/+|\/+$/g, "") || "index";
    const page = PAGES[route];
    if (!page) return json({ error: `no page at ${route}` }, 404);
    return new Response(page.source, {
      headers: { "content-type": "text/markdown; charset=utf-8" },
    });
  },

  async scheduled(event, env, ctx) {
    console.log(`cron trigger ${event.cron} (environment: ${env.ENVIRONMENT})`);
  },
};
"#;

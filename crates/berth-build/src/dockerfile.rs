//! Dockerfile synthesis for artifacts that don't ship their own.

use std::path::Path;

use berth_manifest::Runtime;

/// Synthesized Dockerfile for a declared runtime.
///
/// Node installs dependencies and runs the start script; Python
/// installs requirements and runs the entry module; generic artifacts
/// are expected to ship an executable `start.sh`.
pub fn runtime_dockerfile(runtime: Runtime, primary_port: u16) -> String {
    match runtime {
        Runtime::Node => format!(
            "FROM node:20-alpine\n\
             WORKDIR /app\n\
             COPY . .\n\
             RUN npm install --omit=dev\n\
             EXPOSE {primary_port}\n\
             CMD [\"npm\", \"start\"]\n"
        ),
        Runtime::Python => format!(
            "FROM python:3.12-slim\n\
             WORKDIR /app\n\
             COPY . .\n\
             RUN if [ -f requirements.txt ]; then pip install --no-cache-dir -r requirements.txt; fi\n\
             EXPOSE {primary_port}\n\
             CMD [\"python\", \"main.py\"]\n"
        ),
        Runtime::Generic => format!(
            "FROM alpine:3.20\n\
             WORKDIR /app\n\
             COPY . .\n\
             RUN chmod +x ./start.sh\n\
             EXPOSE {primary_port}\n\
             CMD [\"./start.sh\"]\n"
        ),
    }
}

/// Identity-agent template. Optional `tools/` and `data/` directories
/// are copied only when the artifact actually contains them, so the
/// build never fails on an absent optional directory.
pub fn identity_agent_dockerfile(context: &Path, primary_port: u16) -> String {
    let mut lines = vec![
        "FROM node:20-alpine".to_string(),
        "WORKDIR /app".to_string(),
        "COPY package.json package-lock.json* ./".to_string(),
        "RUN npm install --omit=dev".to_string(),
        "COPY src/ ./src/".to_string(),
    ];
    for optional in ["tools", "data"] {
        if context.join(optional).is_dir() {
            lines.push(format!("COPY {optional}/ ./{optional}/"));
        }
    }
    lines.push(format!("EXPOSE {primary_port}"));
    lines.push("CMD [\"node\", \"src/index.js\"]".to_string());
    lines.join("\n") + "\n"
}

/// Static-file-server image for a frontend bundle. With `spa`, unknown
/// paths fall back to `index.html` so client-side routing works.
pub fn frontend_dockerfile(dir: &str, spa: bool) -> String {
    let mut out = format!(
        "FROM nginx:1.27-alpine\n\
         COPY {dir}/ /usr/share/nginx/html/\n"
    );
    if spa {
        out.push_str("COPY frontend-server.conf /etc/nginx/conf.d/default.conf\n");
    }
    out
}

/// nginx server block with the single-page-app fallback rule.
pub fn spa_server_conf() -> String {
    "server {\n\
     \x20   listen 80;\n\
     \x20   root /usr/share/nginx/html;\n\
     \x20   location / {\n\
     \x20       try_files $uri $uri/ /index.html;\n\
     \x20   }\n\
     }\n"
        .to_string()
}

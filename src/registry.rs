//! Framework registry - static recipes keyed by framework identifier

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::FrameworkSpec;

/// Repository cloned when neither the request nor a custom catalog names one
pub const SAMPLE_REPO: &str = "https://github.com/mouones/test";

const APT: &str = "apt-get update && DEBIAN_FRONTEND=noninteractive apt-get install -y";

/// Read-only catalog, loaded once at startup.
///
/// Catalog order is preserved so listings and batch runs are stable.
#[derive(Debug, Clone)]
pub struct FrameworkRegistry {
    specs: Vec<FrameworkSpec>,
    index: HashMap<String, usize>,
}

impl FrameworkRegistry {
    pub fn new(specs: Vec<FrameworkSpec>) -> Result<Self> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            validate_spec(spec)?;
            if index.insert(spec.key.clone(), i).is_some() {
                return Err(Error::Config(format!("duplicate framework key '{}'", spec.key)));
            }
        }
        Ok(Self { specs, index })
    }

    /// Load a catalog from a JSON array of framework specs
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let specs: Vec<FrameworkSpec> = serde_json::from_str(&raw)?;
        tracing::info!(count = specs.len(), "Loaded framework catalog");
        Self::new(specs)
    }

    pub fn lookup(&self, key: &str) -> Result<&FrameworkSpec> {
        self.index
            .get(key)
            .map(|&i| &self.specs[i])
            .ok_or_else(|| Error::UnknownFramework(key.to_string()))
    }

    pub fn list(&self) -> &[FrameworkSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// The stock catalog of supported stacks
    pub fn builtin() -> Self {
        let specs = builtin_specs();
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.key.clone(), i))
            .collect();
        Self { specs, index }
    }
}

impl Default for FrameworkRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn validate_spec(spec: &FrameworkSpec) -> Result<()> {
    if spec.key.is_empty() || !spec.key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(Error::Config(format!("invalid framework key '{}'", spec.key)));
    }
    if spec.listen_port == 0 {
        return Err(Error::Config(format!("framework '{}' has no listen port", spec.key)));
    }
    if spec.install_command.trim().is_empty() || spec.run_command.trim().is_empty() {
        return Err(Error::Config(format!(
            "framework '{}' needs install and run commands",
            spec.key
        )));
    }
    Ok(())
}

fn python(key: &str, name: &str, fallback_pkgs: &str, run: &str, entry: &str) -> FrameworkSpec {
    FrameworkSpec::new(key, name, 8000)
        .with_install(format!("{APT} python3 python3-pip python3-venv git"))
        .with_setup(format!(
            "cd /opt/app && python3 -m venv venv && . venv/bin/activate && \
             pip install --upgrade pip && \
             if [ -f requirements.txt ]; then pip install -r requirements.txt; \
             else pip install {fallback_pkgs}; fi"
        ))
        .with_run(run)
        .with_entry_file(entry)
        .with_default_repo(SAMPLE_REPO)
}

fn node_install() -> String {
    format!(
        "{APT} curl git && curl -fsSL https://deb.nodesource.com/setup_18.x | bash - && \
         apt-get install -y nodejs"
    )
}

fn builtin_specs() -> Vec<FrameworkSpec> {
    let mut django = python(
        "python-django",
        "Python Django",
        "django gunicorn",
        "/opt/app/venv/bin/gunicorn --bind 0.0.0.0:8000 --workers 2 --timeout 120 wsgi:application \
         || /opt/app/venv/bin/python app.py",
        "manage.py",
    );
    django.setup_command.push_str(
        " && if [ -f manage.py ]; then python manage.py migrate --noinput 2>/dev/null || true; fi",
    );

    vec![
        python(
            "python-flask",
            "Python Flask",
            "flask gunicorn",
            "/opt/app/venv/bin/gunicorn --bind 0.0.0.0:8000 --workers 2 --timeout 120 app:app",
            "app.py",
        ),
        django,
        python(
            "python-fastapi",
            "Python FastAPI",
            "fastapi uvicorn",
            "/opt/app/venv/bin/uvicorn main:app --host 0.0.0.0 --port 8000 \
             || /opt/app/venv/bin/python app.py",
            "main.py",
        ),
        FrameworkSpec::new("nodejs-express", "Node.js Express", 3000)
            .with_install(node_install())
            .with_setup(
                "cd /opt/app && if [ -f package.json ]; then npm install --production; \
                 else echo '{\"name\":\"test-app\",\"version\":\"1.0.0\",\"main\":\"app.js\",\
                 \"dependencies\":{\"express\":\"^4.18.0\"}}' > package.json && npm install; fi",
            )
            .with_run("cd /opt/app && node app.js || node server.js || node index.js")
            .with_entry_file("app.js")
            .with_default_repo(SAMPLE_REPO),
        FrameworkSpec::new("nodejs-nextjs", "Next.js", 3000)
            .with_install(node_install())
            .with_setup(
                "cd /opt/app && if [ -f package.json ]; then npm install && npm run build 2>/dev/null || true; \
                 else npm install express && echo '{\"name\":\"test-app\",\"version\":\"1.0.0\"}' > package.json; fi",
            )
            .with_run("cd /opt/app && npm start || node app.js")
            .with_entry_file("package.json")
            .with_default_repo(SAMPLE_REPO),
        FrameworkSpec::new("php-laravel", "PHP Laravel", 8000)
            .with_install(format!(
                "{APT} php php-cli php-fpm php-mysql php-xml php-mbstring php-curl php-zip unzip git curl && \
                 curl -sS https://getcomposer.org/installer | php -- --install-dir=/usr/local/bin --filename=composer"
            ))
            .with_setup(
                "cd /opt/app && \
                 if [ -f composer.json ]; then composer install --no-interaction --prefer-dist; fi && \
                 if [ ! -f .env ]; then cp .env.example .env 2>/dev/null || echo \"APP_KEY=\" > .env; fi && \
                 if [ -f artisan ]; then php artisan key:generate --no-interaction 2>/dev/null || true; fi",
            )
            .with_run(
                "cd /opt/app && php artisan serve --host=0.0.0.0 --port=8000 || php -S 0.0.0.0:8000 -t public",
            )
            .with_entry_file("artisan")
            .with_default_repo(SAMPLE_REPO),
        FrameworkSpec::new("go-gin", "Go Gin", 8080)
            .with_install(format!("{APT} golang git"))
            .with_setup(
                "cd /opt/app && if [ -f go.mod ]; then go mod download && go build -o app; \
                 else printf 'package main\\nimport (\"fmt\"; \"net/http\")\\nfunc main() { \
                 http.HandleFunc(\"/\", func(w http.ResponseWriter, r *http.Request) { fmt.Fprintf(w, \"Hello from Go!\") }); \
                 http.ListenAndServe(\":8080\", nil) }\\n' > main.go && go mod init app && go build -o app; fi",
            )
            .with_run("cd /opt/app && ./app")
            .with_entry_file("main.go")
            .with_default_repo(SAMPLE_REPO),
        FrameworkSpec::new("rust-actix", "Rust Actix", 8080)
            .with_install(format!(
                "{APT} curl build-essential git && \
                 curl --proto \"=https\" --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y"
            ))
            .with_setup(
                "cd /opt/app && . $HOME/.cargo/env && if [ -f Cargo.toml ]; then cargo build --release; \
                 else cargo init --name app && cargo build --release; fi",
            )
            .with_run(". $HOME/.cargo/env && cd /opt/app && ./target/release/app")
            .with_entry_file("Cargo.toml")
            .with_default_repo(SAMPLE_REPO),
        FrameworkSpec::new("ruby-rails", "Ruby on Rails", 3000)
            .with_install(format!(
                "{APT} ruby ruby-dev build-essential git libsqlite3-dev && gem install bundler"
            ))
            .with_setup(
                "cd /opt/app && if [ -f Gemfile ]; then bundle install; \
                 if [ -f bin/rails ]; then bundle exec rails db:create db:migrate 2>/dev/null || true; fi; \
                 else gem install sinatra && echo \"require 'sinatra'; get('/') { 'Hello from Ruby!' }\" > app.rb; fi",
            )
            .with_run("cd /opt/app && bundle exec rails server -b 0.0.0.0 || ruby app.rb -o 0.0.0.0")
            .with_entry_file("Gemfile")
            .with_default_repo(SAMPLE_REPO),
        FrameworkSpec::new("static-nginx", "Static Site (Nginx)", 80)
            .with_install(format!("{APT} nginx git"))
            .with_setup(
                "rm -rf /var/www/html/* && \
                 if [ -d /opt/app/dist ]; then cp -r /opt/app/dist/* /var/www/html/; \
                 elif [ -d /opt/app/build ]; then cp -r /opt/app/build/* /var/www/html/; \
                 elif [ -d /opt/app/public ]; then cp -r /opt/app/public/* /var/www/html/; \
                 else cp -r /opt/app/* /var/www/html/ 2>/dev/null || echo \"<h1>Static Site</h1>\" > /var/www/html/index.html; fi && \
                 systemctl enable nginx",
            )
            .with_run("systemctl start nginx && systemctl status nginx")
            .with_entry_file("index.html")
            .with_default_repo(SAMPLE_REPO),
        FrameworkSpec::new("jenkins", "Jenkins CI/CD", 8080)
            .with_install(format!(
                "{APT} openjdk-17-jre-headless wget git curl && \
                 wget -q -O /usr/share/keyrings/jenkins-keyring.asc https://pkg.jenkins.io/debian-stable/jenkins.io-2023.key && \
                 echo \"deb [signed-by=/usr/share/keyrings/jenkins-keyring.asc] https://pkg.jenkins.io/debian-stable binary/\" \
                 > /etc/apt/sources.list.d/jenkins.list && apt-get update && apt-get install -y jenkins"
            ))
            .with_setup("systemctl enable jenkins && systemctl start jenkins && sleep 10")
            .with_run("systemctl start jenkins && systemctl status jenkins")
            .with_entry_file("jenkins")
            .with_default_repo(SAMPLE_REPO),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_catalog() {
        let registry = FrameworkRegistry::builtin();
        assert_eq!(registry.len(), 11);
        // catalog entries must pass the same checks as loaded ones
        assert!(FrameworkRegistry::new(registry.list().to_vec()).is_ok());

        let flask = registry.lookup("python-flask").unwrap();
        assert_eq!(flask.listen_port, 8000);
        assert_eq!(flask.display_name, "Python Flask");
        assert_eq!(flask.default_source_repo.as_deref(), Some(SAMPLE_REPO));

        assert_eq!(registry.lookup("static-nginx").unwrap().listen_port, 80);
        assert_eq!(registry.lookup("go-gin").unwrap().listen_port, 8080);
        assert_eq!(registry.list()[0].key, "python-flask");
    }

    #[test]
    fn test_lookup_unknown_echoes_key() {
        let registry = FrameworkRegistry::builtin();
        match registry.lookup("unknown-fw") {
            Err(Error::UnknownFramework(key)) => assert_eq!(key, "unknown-fw"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let spec = FrameworkSpec::new("a", "A", 80).with_install("true").with_run("true");
        assert!(FrameworkRegistry::new(vec![spec.clone(), spec]).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"key": "elixir-phoenix", "display_name": "Phoenix", "listen_port": 4000,
                "install_command": "apt-get install -y elixir", "setup_command": "mix deps.get",
                "run_command": "mix phx.server"}}]"#
        )
        .unwrap();

        let registry = FrameworkRegistry::from_file(file.path()).unwrap();
        let spec = registry.lookup("elixir-phoenix").unwrap();
        assert_eq!(spec.listen_port, 4000);
        assert!(spec.default_source_repo.is_none());
    }
}

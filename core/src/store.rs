//! Persistent template bookkeeping, kept behind a trait so the storage
//! backend stays an external collaborator.

use std::collections::HashMap;
use std::sync::Mutex;

use biod_protocol::SubjectId;
use biod_protocol::TemplateId;
use tracing::warn;

/// Records which templates exist per subject. Writes happen when the
/// dispatcher observes an enrollment complete or a removal confirmation;
/// the driver remains the source of truth for the template data itself.
pub trait TemplateStore: Send + Sync {
    fn add(&self, subject: SubjectId, template_id: TemplateId);
    fn remove(&self, subject: SubjectId, template_id: TemplateId);
    fn list(&self, subject: SubjectId) -> Vec<(TemplateId, String)>;
    fn rename(&self, subject: SubjectId, template_id: TemplateId, label: String);
}

/// In-memory store. The default backend for tests and for embedders that
/// persist elsewhere.
#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: Mutex<HashMap<SubjectId, Vec<(TemplateId, String)>>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn add(&self, subject: SubjectId, template_id: TemplateId) {
        let mut templates = self.templates.lock().unwrap_or_else(|e| e.into_inner());
        let entries = templates.entry(subject).or_default();
        if entries.iter().any(|(id, _)| *id == template_id) {
            warn!(%subject, %template_id, "template already recorded");
            return;
        }
        entries.push((template_id, format!("Template {template_id}")));
    }

    fn remove(&self, subject: SubjectId, template_id: TemplateId) {
        let mut templates = self.templates.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = templates.get_mut(&subject) {
            entries.retain(|(id, _)| *id != template_id);
        }
    }

    fn list(&self, subject: SubjectId) -> Vec<(TemplateId, String)> {
        let templates = self.templates.lock().unwrap_or_else(|e| e.into_inner());
        templates.get(&subject).cloned().unwrap_or_default()
    }

    fn rename(&self, subject: SubjectId, template_id: TemplateId, label: String) {
        let mut templates = self.templates.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = templates
            .get_mut(&subject)
            .and_then(|entries| entries.iter_mut().find(|(id, _)| *id == template_id))
        {
            entry.1 = label;
        }
    }
}

//! Cascading selection: databases, then forms scoped to the chosen database,
//! then the format. Changing a parent selection invalidates everything below.

use crate::apply::describe_selection;
use crate::client::PortalClient;
use crate::error::WizardError;
use crate::model::{Database, ExportFormat, Form, FormList};

pub async fn load_databases(client: &PortalClient) -> Result<Vec<Database>, WizardError> {
    let databases = client.fetch_databases().await?;
    if databases.is_empty() {
        // Distinct from a transport failure: the call worked, there is nothing to pick.
        return Err(WizardError::EmptyResult("databases"));
    }
    Ok(databases)
}

pub async fn load_forms(
    client: &PortalClient,
    database_id: &str,
    rest_variant: bool,
) -> Result<FormList, WizardError> {
    if database_id.trim().is_empty() {
        return Err(WizardError::MissingSelection("database"));
    }
    let list = if rest_variant {
        client.fetch_forms_rest(database_id).await?
    } else {
        client.fetch_forms(database_id).await?
    };
    if list.is_empty() {
        return Err(WizardError::EmptyResult("forms"));
    }
    Ok(list)
}

/// Mirror of the hidden fields a host form reads on submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionFields {
    pub database_id: String,
    pub form_id: String,
    pub format: String,
    pub form_label: String,
    pub description: String,
}

/// Per-instance wizard selection. `form` is only ever an entry of the form
/// list last loaded for `database`; changing the database drops both.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    database: Option<Database>,
    forms: Vec<Form>,
    form: Option<Form>,
    format: Option<ExportFormat>,
}

impl Selection {
    /// Choose a database (or the blank option). Every later step resets.
    pub fn select_database(&mut self, database: Option<Database>) {
        self.forms.clear();
        self.form = None;
        self.format = None;
        self.database = database;
    }

    /// Install the form list loaded for the current database, dropping any
    /// stale form choice.
    pub fn set_forms(&mut self, forms: Vec<Form>) {
        self.form = None;
        self.format = None;
        self.forms = forms;
    }

    /// Choose a form by id. Ids not in the currently loaded list are refused.
    /// Clearing the form hides the format step.
    pub fn select_form(&mut self, form_id: Option<&str>) -> bool {
        match form_id {
            None | Some("") => {
                self.form = None;
                self.format = None;
                true
            }
            Some(id) => match self.forms.iter().find(|f| f.id == id) {
                Some(form) => {
                    self.form = Some(form.clone());
                    true
                }
                None => false,
            },
        }
    }

    /// Formats are only selectable once a form is chosen.
    pub fn select_format(&mut self, format: ExportFormat) -> bool {
        if self.form.is_none() {
            return false;
        }
        self.format = Some(format);
        true
    }

    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    pub fn forms(&self) -> &[Form] {
        &self.forms
    }

    pub fn form(&self) -> Option<&Form> {
        self.form.as_ref()
    }

    pub fn format(&self) -> Option<ExportFormat> {
        self.format
    }

    pub fn form_step_visible(&self) -> bool {
        self.database.is_some()
    }

    pub fn format_step_visible(&self) -> bool {
        self.form.is_some()
    }

    /// Everything needed to start a job is in place.
    pub fn complete(&self) -> bool {
        self.form.is_some() && self.format.is_some()
    }

    /// Current hidden-field mirror; format falls back to csv like the host
    /// form default.
    pub fn fields(&self) -> SelectionFields {
        let database_label = self
            .database
            .as_ref()
            .map(|d| d.display_label().to_string())
            .unwrap_or_default();
        let form_label = self
            .form
            .as_ref()
            .map(|f| f.display_label().to_string())
            .unwrap_or_default();
        SelectionFields {
            database_id: self
                .database
                .as_ref()
                .map(|d| d.id.clone())
                .unwrap_or_default(),
            form_id: self.form.as_ref().map(|f| f.id.clone()).unwrap_or_default(),
            format: self.format.unwrap_or(ExportFormat::Csv).as_ext().to_string(),
            description: describe_selection(&database_label, &form_label),
            form_label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(id: &str) -> Database {
        Database {
            id: id.to_string(),
            label: Some(format!("{id} label")),
        }
    }

    fn form(id: &str) -> Form {
        Form {
            id: id.to_string(),
            label: Some(format!("{id} label")),
        }
    }

    #[test]
    fn form_step_hidden_until_database_chosen() {
        let sel = Selection::default();
        assert!(!sel.form_step_visible());
        assert!(!sel.format_step_visible());

        let mut sel = Selection::default();
        sel.select_database(Some(db("d1")));
        assert!(sel.form_step_visible());
        assert!(!sel.format_step_visible());
    }

    #[test]
    fn changing_database_clears_forms_and_later_steps() {
        let mut sel = Selection::default();
        sel.select_database(Some(db("d1")));
        sel.set_forms(vec![form("f1"), form("f2")]);
        assert!(sel.select_form(Some("f1")));
        assert!(sel.select_format(ExportFormat::Xlsx));
        assert!(sel.complete());

        sel.select_database(Some(db("d2")));
        assert!(sel.forms().is_empty());
        assert!(sel.form().is_none());
        assert!(sel.format().is_none());
        assert!(!sel.format_step_visible());
    }

    #[test]
    fn blank_database_hides_every_later_step() {
        let mut sel = Selection::default();
        sel.select_database(Some(db("d1")));
        sel.set_forms(vec![form("f1")]);
        sel.select_form(Some("f1"));

        sel.select_database(None);
        assert!(!sel.form_step_visible());
        assert!(!sel.format_step_visible());
    }

    #[test]
    fn form_outside_loaded_list_is_refused() {
        let mut sel = Selection::default();
        sel.select_database(Some(db("d1")));
        sel.set_forms(vec![form("f1")]);
        assert!(!sel.select_form(Some("f9")));
        assert!(sel.form().is_none());
    }

    #[test]
    fn clearing_form_hides_format_step() {
        let mut sel = Selection::default();
        sel.select_database(Some(db("d1")));
        sel.set_forms(vec![form("f1")]);
        sel.select_form(Some("f1"));
        assert!(sel.format_step_visible());

        sel.select_form(None);
        assert!(!sel.format_step_visible());
        assert!(!sel.select_format(ExportFormat::Csv));
    }

    #[test]
    fn mirrored_fields_track_selection() {
        let mut sel = Selection::default();
        assert_eq!(sel.fields().format, "csv");
        assert_eq!(
            sel.fields().description,
            "This resource was downloaded from ActivityInfo."
        );

        sel.select_database(Some(db("d1")));
        sel.set_forms(vec![form("f1")]);
        sel.select_form(Some("f1"));
        sel.select_format(ExportFormat::Xlsx);
        let fields = sel.fields();
        assert_eq!(fields.database_id, "d1");
        assert_eq!(fields.form_id, "f1");
        assert_eq!(fields.format, "xlsx");
        assert_eq!(fields.form_label, "f1 label");
        assert_eq!(
            fields.description,
            "This resource was downloaded from ActivityInfo. Database: d1 label, Form: f1 label"
        );
    }
}

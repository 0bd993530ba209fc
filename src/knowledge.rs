//! Base de conocimiento por sesión: mapa de título → contenido aprendido.
//! El contenido se reutiliza después como contexto en los prompts al LLM.

use std::collections::HashMap;

use chrono::Utc;

use crate::models::{ContentSource, KnowledgeEntry};

/// Longitud máxima (en caracteres) del texto de una entrada.
/// El exceso se descarta silenciosamente al guardar; no hay aviso ni versión previa.
pub const MAX_ENTRY_CHARS: usize = 5000;

/// Longitud máxima total (en caracteres) del resumen de contexto que se
/// inyecta en un prompt, se hayan guardado las entradas que se hayan guardado.
pub const MAX_CONTEXT_CHARS: usize = 1500;

/// Almacén de conocimiento de una sesión.
///
/// Los títulos son únicos: guardar dos veces bajo el mismo título reemplaza
/// la entrada anterior de forma atómica. No hay borrado individual en el
/// modelo de datos; el almacén muere con la sesión.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    entries: HashMap<String, KnowledgeEntry>,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guarda (o reemplaza) una entrada bajo `title`. El texto se trunca a
    /// `MAX_ENTRY_CHARS` caracteres y se estampa la fecha de creación.
    /// Siempre tiene éxito para un título no vacío; la validación del título
    /// corresponde al coordinador de sesión.
    pub fn put(&mut self, title: &str, text: &str, source: ContentSource) {
        let entry = KnowledgeEntry {
            text: truncate_chars(text, MAX_ENTRY_CHARS),
            source,
            created_at: Utc::now(),
        };
        self.entries.insert(title.to_string(), entry);
    }

    pub fn get(&self, title: &str) -> Option<&KnowledgeEntry> {
        self.entries.get(title)
    }

    /// Itera sobre todas las entradas. El orden de iteración no está
    /// garantizado (el almacén es un `HashMap`); quien necesite un orden
    /// determinista debe ordenar en su lado.
    pub fn list_all(&self) -> impl Iterator<Item = (&String, &KnowledgeEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Construye un resumen del conocimiento guardado para inyectarlo como
    /// contexto en un prompt: un prefijo de cada entrada, etiquetado por su
    /// título. Función pura del estado actual del almacén.
    ///
    /// La salida nunca supera `MAX_CONTEXT_CHARS` caracteres.
    pub fn build_context_summary(&self, max_entry_chars: usize) -> String {
        if self.entries.is_empty() {
            return String::new();
        }

        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(title, entry)| format!("{}: {}", title, truncate_chars(&entry.text, max_entry_chars)))
            .collect();

        let summary = format!("Conocimiento de referencia: {}", parts.join("; "));
        truncate_chars(&summary, MAX_CONTEXT_CHARS)
    }
}

/// Plantillas rápidas de contenido inicial (título, texto), listas para
/// insertarse en el almacén con un solo clic desde la interfaz.
pub fn templates() -> &'static [(&'static str, &'static str)] {
    &[
        (
            "Price_Action_Basics",
            "El trading de acción del precio se centra en leer el movimiento bruto del precio \
             sin indicadores. Conceptos clave: soportes y resistencias, líneas de tendencia, \
             patrones de velas, rupturas y giros de tendencia.",
        ),
        (
            "Risk_Management",
            "Reglas de gestión del riesgo: 1. Arriesgar solo un 1-2% por operación \
             2. Usar siempre stop loss 3. Mantener ratios riesgo-beneficio positivos \
             4. Diversificar posiciones 5. Llevar un diario de trading.",
        ),
    ]
}

/// Trunca un texto a `max_chars` caracteres (no bytes, para no partir
/// nunca una secuencia UTF-8).
fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_y_get_trunca_a_la_longitud_maxima() {
        let mut store = KnowledgeStore::new();
        let texto_largo = "x".repeat(MAX_ENTRY_CHARS + 500);

        store.put("Notas", &texto_largo, ContentSource::Pasted);

        let entry = store.get("Notas").expect("la entrada debe existir");
        assert_eq!(entry.text.chars().count(), MAX_ENTRY_CHARS);
        assert_eq!(entry.source, ContentSource::Pasted);
    }

    #[test]
    fn un_texto_corto_se_guarda_integro() {
        let mut store = KnowledgeStore::new();
        store.put("Risk_Rules", "Arriesgar solo un 1-2% por operación", ContentSource::Uploaded);

        let entry = store.get("Risk_Rules").unwrap();
        assert_eq!(entry.text, "Arriesgar solo un 1-2% por operación");
        assert_eq!(entry.source, ContentSource::Uploaded);
    }

    #[test]
    fn guardar_dos_veces_el_mismo_titulo_reemplaza_sin_duplicar() {
        let mut store = KnowledgeStore::new();
        store.put("Notas", "primera versión", ContentSource::Pasted);
        store.put("Notas", "segunda versión", ContentSource::Pasted);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("Notas").unwrap().text, "segunda versión");
    }

    #[test]
    fn get_de_un_titulo_inexistente_devuelve_none() {
        let store = KnowledgeStore::new();
        assert!(store.get("no_existe").is_none());
    }

    #[test]
    fn el_resumen_de_contexto_respeta_la_cota_total() {
        let mut store = KnowledgeStore::new();
        for i in 0..50 {
            store.put(&format!("Entrada_{i}"), &"y".repeat(2000), ContentSource::Pasted);
        }

        let resumen = store.build_context_summary(100);
        assert!(resumen.chars().count() <= MAX_CONTEXT_CHARS);
    }

    #[test]
    fn el_resumen_esta_vacio_sin_entradas() {
        let store = KnowledgeStore::new();
        assert_eq!(store.build_context_summary(100), "");
    }

    #[test]
    fn el_resumen_etiqueta_cada_entrada_por_su_titulo() {
        let mut store = KnowledgeStore::new();
        store.put("Soportes", "Un soporte es un nivel de precio...", ContentSource::Pasted);

        let resumen = store.build_context_summary(100);
        assert!(resumen.contains("Soportes:"));
        assert!(resumen.starts_with("Conocimiento de referencia:"));
    }

    #[test]
    fn la_truncacion_no_parte_caracteres_multibyte() {
        let mut store = KnowledgeStore::new();
        let texto = "ñ".repeat(MAX_ENTRY_CHARS + 10);

        store.put("Acentos", &texto, ContentSource::Pasted);

        assert_eq!(store.get("Acentos").unwrap().text.chars().count(), MAX_ENTRY_CHARS);
    }

    #[test]
    fn las_plantillas_tienen_titulos_conocidos() {
        let titulos: Vec<&str> = templates().iter().map(|(t, _)| *t).collect();
        assert!(titulos.contains(&"Price_Action_Basics"));
        assert!(titulos.contains(&"Risk_Management"));
    }
}

//! Registro de análisis de una sesión: lista ordenada de peticiones de
//! análisis y sus desenlaces. Solo-añadir, salvo borrado explícito de un
//! elemento o consulta de los más recientes.

use thiserror::Error;

use crate::models::AnalysisRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisLogError {
    #[error("Índice {index} fuera de rango (el registro tiene {len} análisis)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Lista cronológica de análisis. Las posiciones no son identificadores
/// estables: tras un borrado, los llamantes deben recalcularlas a partir
/// del orden actual.
#[derive(Debug, Default)]
pub struct AnalysisLog {
    records: Vec<AnalysisRecord>,
}

impl AnalysisLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Añade un análisis al final del registro y devuelve su posición actual.
    pub fn append(&mut self, record: AnalysisRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    /// Elimina exactamente un análisis por posición. Con un índice inválido
    /// devuelve `IndexOutOfRange` y deja el registro intacto.
    pub fn remove_at(&mut self, index: usize) -> Result<AnalysisRecord, AnalysisLogError> {
        if index >= self.records.len() {
            return Err(AnalysisLogError::IndexOutOfRange { index, len: self.records.len() });
        }
        Ok(self.records.remove(index))
    }

    /// Los últimos `n` análisis, del más reciente al más antiguo.
    /// No muta el registro.
    pub fn recent(&self, n: usize) -> Vec<&AnalysisRecord> {
        self.records.iter().rev().take(n).collect()
    }

    pub fn get(&self, index: usize) -> Option<&AnalysisRecord> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisKind;
    use chrono::Utc;

    fn registro(descripcion: &str) -> AnalysisRecord {
        AnalysisRecord {
            subject_description: descripcion.to_string(),
            analysis_kind: AnalysisKind::Technical,
            requested_at: Utc::now(),
            ai_text: None,
            risk_label: None,
            confidence: None,
        }
    }

    #[test]
    fn append_devuelve_posiciones_consecutivas() {
        let mut log = AnalysisLog::new();
        assert_eq!(log.append(registro("a")), 0);
        assert_eq!(log.append(registro("b")), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn remove_at_con_indice_valido_elimina_exactamente_uno() {
        let mut log = AnalysisLog::new();
        log.append(registro("a"));
        log.append(registro("b"));
        log.append(registro("c"));

        let eliminado = log.remove_at(1).expect("el índice 1 es válido");
        assert_eq!(eliminado.subject_description, "b");
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(1).unwrap().subject_description, "c");
    }

    #[test]
    fn remove_at_fuera_de_rango_no_toca_el_registro() {
        let mut log = AnalysisLog::new();
        log.append(registro("a"));

        let err = log.remove_at(5).unwrap_err();
        assert_eq!(err, AnalysisLogError::IndexOutOfRange { index: 5, len: 1 });
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn remove_at_sobre_un_registro_vacio_falla() {
        let mut log = AnalysisLog::new();
        assert!(log.remove_at(0).is_err());
    }

    #[test]
    fn todos_los_indices_validos_son_eliminables() {
        let mut log = AnalysisLog::new();
        for i in 0..4 {
            log.append(registro(&format!("r{i}")));
        }
        // Eliminando siempre la posición 0 se vacía el registro entero.
        for esperado in (0..4).rev() {
            log.remove_at(0).unwrap();
            assert_eq!(log.len(), esperado);
        }
    }

    #[test]
    fn recent_devuelve_los_ultimos_en_orden_inverso() {
        let mut log = AnalysisLog::new();
        log.append(registro("viejo"));
        log.append(registro("medio"));
        log.append(registro("nuevo"));

        let recientes = log.recent(2);
        assert_eq!(recientes.len(), 2);
        assert_eq!(recientes[0].subject_description, "nuevo");
        assert_eq!(recientes[1].subject_description, "medio");
        // La consulta no muta el registro.
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn recent_con_n_mayor_que_el_registro_devuelve_todo() {
        let mut log = AnalysisLog::new();
        log.append(registro("único"));
        assert_eq!(log.recent(10).len(), 1);
    }
}

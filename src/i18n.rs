use std::collections::HashMap;

pub struct I18n {
    translations: HashMap<String, HashMap<String, String>>,
    current_lang: String,
}

impl I18n {
    pub fn new(lang: &str) -> Self {
        let mut translations = HashMap::new();

        // English
        let mut en = HashMap::new();
        en.insert("status_running".to_string(), "RUNNING".to_string());
        en.insert("status_stopped".to_string(), "STOPPED".to_string());
        en.insert("status_endpoint".to_string(), "coaching service at {0}".to_string());
        en.insert("status_disabled".to_string(), "capture disabled by {0}".to_string());
        en.insert("config_path".to_string(), "Config file: {0}".to_string());
        en.insert("config_written".to_string(), "Config written to {0}".to_string());
        en.insert("error_spawn".to_string(), "Failed to start command".to_string());
        en.insert("error_wait".to_string(), "Failed to wait for command".to_string());
        en.insert("error_open_capture".to_string(), "Cannot open capture file {0}".to_string());
        en.insert("error_relay".to_string(), "Relay stopped".to_string());
        en.insert("error_render_config".to_string(), "Cannot render config".to_string());
        en.insert("warning_signal_handler".to_string(), "Cannot install interrupt handler; Ctrl-C may skip cleanup".to_string());

        // Russian
        let mut ru = HashMap::new();
        ru.insert("status_running".to_string(), "ЗАПУЩЕН".to_string());
        ru.insert("status_stopped".to_string(), "ОСТАНОВЛЕН".to_string());
        ru.insert("status_endpoint".to_string(), "сервис подсказок: {0}".to_string());
        ru.insert("status_disabled".to_string(), "перехват отключён через {0}".to_string());
        ru.insert("config_path".to_string(), "Файл настроек: {0}".to_string());
        ru.insert("config_written".to_string(), "Настройки записаны в {0}".to_string());
        ru.insert("error_spawn".to_string(), "Не удалось запустить команду".to_string());
        ru.insert("error_wait".to_string(), "Не удалось дождаться завершения команды".to_string());
        ru.insert("error_open_capture".to_string(), "Не удалось открыть файл перехвата {0}".to_string());
        ru.insert("error_relay".to_string(), "Ретрансляция прервана".to_string());
        ru.insert("error_render_config".to_string(), "Не удалось сформировать настройки".to_string());
        ru.insert("warning_signal_handler".to_string(), "Не удалось установить обработчик Ctrl-C; очистка может быть пропущена".to_string());

        translations.insert("en".to_string(), en);
        translations.insert("ru".to_string(), ru);

        let effective_lang = if lang.starts_with("ru") || lang == "russian" {
            "ru"
        } else {
            // English by default
            "en"
        };

        Self {
            translations,
            current_lang: effective_lang.to_string(),
        }
    }

    pub fn t(&self, key: &str) -> String {
        if let Some(lang_map) = self.translations.get(&self.current_lang) {
            if let Some(value) = lang_map.get(key) {
                return value.clone();
            }
        }
        key.to_string()
    }

    pub fn t_format(&self, key: &str, args: &[&str]) -> String {
        let template = self.t(key);
        let mut result = template;
        for (i, arg) in args.iter().enumerate() {
            result = result.replace(&format!("{{{}}}", i), arg);
        }
        result
    }
}
